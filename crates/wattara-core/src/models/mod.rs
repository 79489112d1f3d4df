//! Data models for Wattara entities.
//!
//! - `Device`, `DeviceList`, `DeviceDraft`: registered meters
//! - `SensorReading`, `ReadingHistory`, `TimeRange`: telemetry
//! - `Prediction`: output of the backend power model

pub mod device;
pub mod reading;

pub use device::{Device, DeviceDraft, DeviceList};
pub use reading::{Prediction, ReadingHistory, SensorReading, TimeRange};
