//! Authentication state and its persistence.
//!
//! This module provides:
//! - `Session`: the user + token pair, and how it is written to a store
//! - `SessionStore`: the key/value persistence port, with in-memory,
//!   file and OS keychain implementations
//! - `LoginRedirect`: the hook invoked when a session cannot be refreshed

pub mod credentials;
pub mod redirect;
pub mod session;
pub mod store;

pub use credentials::KeyringStore;
pub use redirect::{LoginRedirect, NoRedirect};
pub use session::{AuthState, AuthTokens, Session, User, ACTIVE_DEVICE_KEY, TOKENS_KEY, USER_KEY};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
