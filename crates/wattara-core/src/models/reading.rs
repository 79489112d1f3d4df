use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One snapshot of the meter. The backend may omit any quantity it does not
/// measure; those read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub voltage: f64,
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub power: f64,
    #[serde(default)]
    pub pf: f64,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub timestamp: String,
}

impl SensorReading {
    /// Parse the timestamp. Accepts RFC 3339 and the naive ISO format the
    /// backend emits, which is taken as UTC.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Body of `GET /monitoring/history/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingHistory {
    #[serde(default)]
    pub data: Vec<SensorReading>,
}

/// History window offered by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeRange {
    #[default]
    OneHour,
    SixHours,
    OneDay,
    SevenDays,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::OneHour,
        TimeRange::SixHours,
        TimeRange::OneDay,
        TimeRange::SevenDays,
    ];

    /// Query-string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1h",
            TimeRange::SixHours => "6h",
            TimeRange::OneDay => "24h",
            TimeRange::SevenDays => "7d",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1 Hour",
            TimeRange::SixHours => "6 Hours",
            TimeRange::OneDay => "24 Hours",
            TimeRange::SevenDays => "7 Days",
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeRange::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown time range '{}' (expected 1h, 6h, 24h or 7d)", s))
    }
}

/// Result of `GET /prediction/run/`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_power: f64,
}
