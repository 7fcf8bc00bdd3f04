//! HTTP clients for the activity provider and the detail relay

pub mod relay;
pub mod strava;

pub use relay::RelayClient;
pub use strava::StravaClient;
