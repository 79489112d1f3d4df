use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A metering device registered to the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub user: i64,
    #[serde(default)]
    pub user_username: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Device {
    /// Name with location, e.g. "Main Panel (Garage)".
    pub fn label(&self) -> String {
        if self.location.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.location)
        }
    }
}

/// Body of `GET /monitoring/devices/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// Fields a client may set when creating or updating a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDraft {
    pub name: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}
