//! REST API client module for the Wattara backend.
//!
//! This module provides the `SessionClient`, which owns the login session
//! and mediates every authenticated call to the backend.
//!
//! The API uses JWT bearer tokens: a short-lived access token and a
//! refresh token exchanged at `/api/auth/token/refresh/`.

pub mod client;
pub mod error;
pub mod request;

pub use client::{SessionClient, SessionClientBuilder, DEFAULT_BASE_URL};
pub use error::ClientError;
pub use request::{ApiResponse, PendingRequest};
