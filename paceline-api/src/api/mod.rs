//! HTTP API handlers

pub mod activities;
pub mod activity;
pub mod admin;
pub mod gpt;
pub mod health;
pub mod sync;
pub mod users;
pub mod webhook;
