use tracing::{debug, warn};

use crate::api::{ClientError, SessionClient};
use crate::auth::ACTIVE_DEVICE_KEY;
use crate::models::{Device, DeviceDraft, DeviceList};

const DEVICES_PATH: &str = "/monitoring/devices/";

fn device_path(device_id: &str) -> String {
    format!("{}{}/", DEVICES_PATH, urlencoding::encode(device_id))
}

/// The user's devices and the one currently selected.
///
/// Every mutation is followed by a fresh list fetch so local state always
/// mirrors the backend.
pub struct DeviceManager {
    client: SessionClient,
    devices: Vec<Device>,
    active: Option<Device>,
}

impl DeviceManager {
    /// Create a manager, restoring the active device from the client's store.
    pub fn new(client: SessionClient) -> Self {
        let active = match client.store().load(ACTIVE_DEVICE_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Device>(&json) {
                Ok(device) => Some(device),
                Err(e) => {
                    warn!(error = %e, "Stored active device is malformed, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored active device");
                None
            }
        };

        Self {
            client,
            devices: Vec::new(),
            active,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn active_device(&self) -> Option<&Device> {
        self.active.as_ref()
    }

    pub fn find(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Select a device (or none) and persist the choice.
    pub fn set_active(&mut self, device: Option<Device>) -> Result<(), ClientError> {
        match &device {
            Some(d) => {
                let json = serde_json::to_string(d)
                    .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
                self.client.store().save(ACTIVE_DEVICE_KEY, &json)?;
            }
            None => self.client.store().clear(ACTIVE_DEVICE_KEY)?,
        }
        self.active = device;
        Ok(())
    }

    /// Reload the device list. Picks the first device when none is active.
    pub async fn fetch_devices(&mut self) -> Result<&[Device], ClientError> {
        let list: DeviceList = match self.client.get_json(DEVICES_PATH).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to fetch devices");
                self.devices.clear();
                return Err(e);
            }
        };
        debug!(count = list.devices.len(), "Devices fetched");
        self.devices = list.devices;

        if self.active.is_none() {
            if let Some(first) = self.devices.first().cloned() {
                self.set_active(Some(first))?;
            }
        }
        Ok(&self.devices)
    }

    pub async fn create_device(&mut self, name: &str, location: &str) -> Result<Device, ClientError> {
        let was_empty = self.devices.is_empty();
        let draft = DeviceDraft {
            name: name.to_string(),
            location: location.to_string(),
            is_active: Some(true),
        };
        let created: Device = self.client.post_json(DEVICES_PATH, &draft).await?;
        debug!(device_id = %created.device_id, "Device created");

        self.fetch_devices().await?;
        if was_empty {
            self.set_active(Some(created.clone()))?;
        }
        Ok(created)
    }

    pub async fn update_device(
        &mut self,
        device_id: &str,
        name: &str,
        location: &str,
    ) -> Result<Device, ClientError> {
        let draft = DeviceDraft {
            name: name.to_string(),
            location: location.to_string(),
            is_active: None,
        };
        let updated: Device = self.client.put_json(&device_path(device_id), &draft).await?;
        debug!(device_id, "Device updated");

        self.fetch_devices().await?;
        if self.active.as_ref().is_some_and(|d| d.device_id == device_id) {
            let refreshed = self.find(device_id).cloned().unwrap_or_else(|| updated.clone());
            self.set_active(Some(refreshed))?;
        }
        Ok(updated)
    }

    pub async fn delete_device(&mut self, device_id: &str) -> Result<(), ClientError> {
        self.client.delete(&device_path(device_id)).await?;
        debug!(device_id, "Device deleted");

        if self.active.as_ref().is_some_and(|d| d.device_id == device_id) {
            self.set_active(None)?;
        }
        self.fetch_devices().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthTokens, MemoryStore, Session, SessionStore, User};
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn device_json(id: i64, device_id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "device_id": device_id,
            "name": name,
            "location": "Garage",
            "user": 3,
            "user_username": "rina",
            "is_active": true,
            "created_at": "2025-03-01T08:15:00Z",
            "updated_at": "2025-03-01T08:15:00Z"
        })
    }

    fn signed_in(server: &MockServer, store: &MemoryStore) -> SessionClient {
        Session {
            user: User {
                id: 3,
                username: "rina".to_string(),
                email: "rina@example.com".to_string(),
                first_name: None,
                last_name: None,
            },
            tokens: AuthTokens {
                access: "a1".to_string(),
                refresh: "r1".to_string(),
            },
        }
        .save(store);
        SessionClient::builder(server.uri())
            .store(store.clone())
            .build()
            .unwrap()
    }

    async fn mount_list(server: &MockServer, devices: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(DEVICES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": devices.len(),
                "devices": devices
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_device_becomes_active() {
        let server = MockServer::start().await;
        mount_list(&server, vec![device_json(1, "d-1", "Main"), device_json(2, "d-2", "Shed")]).await;

        let store = MemoryStore::new();
        let mut manager = DeviceManager::new(signed_in(&server, &store));
        assert!(manager.active_device().is_none());

        manager.fetch_devices().await.unwrap();

        assert_eq!(manager.devices().len(), 2);
        assert_eq!(manager.active_device().unwrap().device_id, "d-1");
        assert!(store.load(ACTIVE_DEVICE_KEY).unwrap().unwrap().contains("d-1"));
    }

    #[tokio::test]
    async fn test_active_device_survives_restart() {
        let server = MockServer::start().await;
        mount_list(&server, vec![device_json(1, "d-1", "Main"), device_json(2, "d-2", "Shed")]).await;

        let store = MemoryStore::new();
        let mut manager = DeviceManager::new(signed_in(&server, &store));
        manager.fetch_devices().await.unwrap();
        let shed = manager.find("d-2").cloned();
        manager.set_active(shed).unwrap();

        let mut restarted = DeviceManager::new(signed_in(&server, &store));
        assert_eq!(restarted.active_device().unwrap().device_id, "d-2");
        restarted.fetch_devices().await.unwrap();
        assert_eq!(restarted.active_device().unwrap().device_id, "d-2");
    }

    #[tokio::test]
    async fn test_create_first_device_selects_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DEVICES_PATH))
            .and(body_json(json!({"name": "Main", "location": "Garage", "is_active": true})))
            .respond_with(ResponseTemplate::new(201).set_body_json(device_json(1, "d-1", "Main")))
            .expect(1)
            .mount(&server)
            .await;
        mount_list(&server, vec![device_json(1, "d-1", "Main")]).await;

        let store = MemoryStore::new();
        let mut manager = DeviceManager::new(signed_in(&server, &store));
        let created = manager.create_device("Main", "Garage").await.unwrap();

        assert_eq!(created.device_id, "d-1");
        assert_eq!(manager.devices().len(), 1);
        assert_eq!(manager.active_device(), Some(&created));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_update_refreshes_active_device() {
        let server = MockServer::start().await;
        let renamed = device_json(1, "d-1", "Main Panel");
        Mock::given(method("PUT"))
            .and(path("/monitoring/devices/d-1/"))
            .and(body_json(json!({"name": "Main Panel", "location": "Garage"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(renamed.clone()))
            .mount(&server)
            .await;
        mount_list(&server, vec![renamed]).await;

        let store = MemoryStore::new();
        let client = signed_in(&server, &store);
        store
            .save(ACTIVE_DEVICE_KEY, &device_json(1, "d-1", "Main").to_string())
            .unwrap();
        let mut manager = DeviceManager::new(client);

        manager.update_device("d-1", "Main Panel", "Garage").await.unwrap();

        assert_eq!(manager.active_device().unwrap().name, "Main Panel");
        assert!(store.load(ACTIVE_DEVICE_KEY).unwrap().unwrap().contains("Main Panel"));
    }

    #[tokio::test]
    async fn test_delete_active_device_clears_selection() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/monitoring/devices/d-1/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        mount_list(&server, vec![]).await;

        let store = MemoryStore::new();
        let client = signed_in(&server, &store);
        store
            .save(ACTIVE_DEVICE_KEY, &device_json(1, "d-1", "Main").to_string())
            .unwrap();
        let mut manager = DeviceManager::new(client);

        manager.delete_device("d-1").await.unwrap();

        assert!(manager.active_device().is_none());
        assert!(manager.devices().is_empty());
        assert_eq!(store.load(ACTIVE_DEVICE_KEY).unwrap(), None);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_device_id_is_encoded_in_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/monitoring/devices/shed%20%232/"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        mount_list(&server, vec![]).await;

        let store = MemoryStore::new();
        let mut manager = DeviceManager::new(signed_in(&server, &store));
        manager.delete_device("shed #2").await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_empties_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEVICES_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let mut manager = DeviceManager::new(signed_in(&server, &store));
        manager.devices = vec![serde_json::from_value(device_json(1, "d-1", "Main")).unwrap()];

        let err = manager.fetch_devices().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(manager.devices().is_empty());
    }
}
