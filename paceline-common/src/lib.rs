//! Shared library for the paceline services
//!
//! Error type, configuration, the canonical activity model, schema-on-read
//! normalization of upstream payloads, and training-load enrichment.

pub mod config;
pub mod enrich;
pub mod error;
pub mod model;
pub mod normalize;
pub mod time;

pub use config::Config;
pub use error::{Error, Result};
