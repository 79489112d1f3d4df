//! Utility functions for display formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_date, format_power_factor, format_quantity, format_timestamp, truncate_string};
