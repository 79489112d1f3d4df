//! Telemetry and prediction endpoints.
//!
//! `MonitoringService` fetches the latest reading and historical windows
//! and can poll the latest reading on a fixed interval.
//! `PredictionService` runs the backend power model.

pub mod monitor;
pub mod prediction;

pub use monitor::{MonitoringService, DEFAULT_POLL_INTERVAL};
pub use prediction::PredictionService;
