//! Device management for the signed-in user.
//!
//! `DeviceManager` keeps the device list in sync with the backend and
//! remembers which device is active across restarts (store key
//! `activeDevice`, cleared on logout).

pub mod manager;

pub use manager::DeviceManager;
