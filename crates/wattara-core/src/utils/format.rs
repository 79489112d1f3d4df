use chrono::{DateTime, Utc};

/// Format a measured quantity with its unit, e.g. `format_quantity(330.0, "W", 1)` -> "330.0 W".
/// Powers of a thousand or more switch to the k-prefixed unit.
pub fn format_quantity(value: f64, unit: &str, decimals: usize) -> String {
    if !value.is_finite() {
        return format!("-- {}", unit);
    }
    if value.abs() >= 1000.0 && matches!(unit, "W" | "Wh" | "VA") {
        format!("{:.*} k{}", decimals, value / 1000.0, unit)
    } else {
        format!("{:.*} {}", decimals, value, unit)
    }
}

/// Power factor as a plain ratio with two decimals
pub fn format_power_factor(pf: f64) -> String {
    if pf.is_finite() {
        format!("{:.2}", pf)
    } else {
        "--".to_string()
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format a timestamp for display
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%b %d, %Y").to_string()
}

/// Format a timestamp with time of day for reading tables
pub fn format_timestamp(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}
