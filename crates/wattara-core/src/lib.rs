//! Wattara core - client library for the Wattara meter-telemetry backend.
//!
//! Provides the authenticated `SessionClient` (token persistence, bearer
//! injection, refresh-and-replay on 401), device management, telemetry and
//! prediction services, and configuration shared by the front ends.

pub mod api;
pub mod auth;
pub mod config;
pub mod devices;
pub mod models;
pub mod telemetry;
pub mod utils;

pub use api::{ApiResponse, ClientError, PendingRequest, SessionClient, SessionClientBuilder};
pub use auth::{
    AuthState, AuthTokens, FileStore, KeyringStore, LoginRedirect, MemoryStore, NoRedirect,
    Session, SessionStore, StoreError, User,
};
pub use config::{Config, StorageBackend};
pub use devices::DeviceManager;
pub use models::{Device, Prediction, SensorReading, TimeRange};
pub use telemetry::{MonitoringService, PredictionService};
