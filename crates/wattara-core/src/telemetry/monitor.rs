use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::{ClientError, SessionClient};
use crate::models::{ReadingHistory, SensorReading, TimeRange};

/// How often the live view asks for a new reading.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Buffer size for the polling channel.
const POLL_CHANNEL_BUFFER: usize = 16;

/// Reads telemetry for one device at a time.
#[derive(Clone)]
pub struct MonitoringService {
    client: SessionClient,
}

impl MonitoringService {
    pub fn new(client: SessionClient) -> Self {
        Self { client }
    }

    /// Most recent reading of a device.
    pub async fn latest(&self, device_id: &str) -> Result<SensorReading, ClientError> {
        let path = format!(
            "/monitoring/api/?device_id={}",
            urlencoding::encode(device_id)
        );
        self.client.get_json(&path).await
    }

    /// Readings over the given window, oldest first as the backend returns them.
    pub async fn history(
        &self,
        device_id: &str,
        range: TimeRange,
    ) -> Result<Vec<SensorReading>, ClientError> {
        let path = format!(
            "/monitoring/history/?device_id={}&range={}",
            urlencoding::encode(device_id),
            range.as_str()
        );
        let history: ReadingHistory = self.client.get_json(&path).await?;
        debug!(device_id, range = %range, count = history.data.len(), "History fetched");
        Ok(history.data)
    }

    /// Poll the latest reading every `interval` on a background task.
    ///
    /// Each result, success or failure, is sent on the returned channel. The
    /// task ends when the receiver is dropped or the session expires.
    pub fn watch_latest(
        &self,
        device_id: &str,
        interval: Duration,
    ) -> mpsc::Receiver<Result<SensorReading, ClientError>> {
        let (tx, rx) = mpsc::channel(POLL_CHANNEL_BUFFER);
        let service = self.clone();
        let device_id = device_id.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let result = service.latest(&device_id).await;
                let expired = matches!(result, Err(ClientError::SessionExpired));
                if let Err(ref e) = result {
                    warn!(device_id = %device_id, error = %e, "Failed to fetch latest reading");
                }
                if tx.send(result).await.is_err() {
                    debug!(device_id = %device_id, "Reading receiver dropped, stopping poll");
                    break;
                }
                if expired {
                    break;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthTokens, MemoryStore, Session, User};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> MonitoringService {
        let store = MemoryStore::new();
        Session {
            user: User {
                id: 1,
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
        .save(&store);
        let client = SessionClient::builder(server.uri())
            .store(store)
            .build()
            .unwrap();
        MonitoringService::new(client)
    }

    #[tokio::test]
    async fn test_latest_reading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitoring/api/"))
            .and(query_param("device_id", "d-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timestamp": "2025-03-01T10:00:00",
                "voltage": 220,
                "current": 1.5,
                "power": 330
            })))
            .mount(&server)
            .await;

        let reading = service(&server).latest("d-1").await.unwrap();
        assert_eq!(reading.voltage, 220.0);
        assert_eq!(reading.power, 330.0);
    }

    #[tokio::test]
    async fn test_history_uses_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitoring/history/"))
            .and(query_param("device_id", "d-1"))
            .and(query_param("range", "24h"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"timestamp": "2025-03-01T10:00:00Z", "power": 310.5},
                    {"timestamp": "2025-03-01T11:00:00Z", "power": 298.0}
                ]
            })))
            .mount(&server)
            .await;

        let history = service(&server).history("d-1", TimeRange::OneDay).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].power, 298.0);
    }

    #[tokio::test]
    async fn test_device_id_is_encoded_in_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitoring/history/"))
            .and(query_param("device_id", "shed #2 & co"))
            .and(query_param("range", "7d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"timestamp": "2025-03-01T10:00:00Z", "power": 5.0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let history = service(&server)
            .history("shed #2 & co", TimeRange::SevenDays)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_history_without_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitoring/history/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let history = service(&server).history("d-1", TimeRange::OneHour).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_watch_latest_stops_when_receiver_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitoring/api/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"power": 12.5})))
            .mount(&server)
            .await;

        let mut rx = service(&server).watch_latest("d-1", Duration::from_millis(20));
        for _ in 0..3 {
            let reading = rx.recv().await.unwrap().unwrap();
            assert_eq!(reading.power, 12.5);
        }
        drop(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let polled = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), polled);
    }

    #[tokio::test]
    async fn test_watch_latest_reports_errors_and_keeps_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitoring/api/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/monitoring/api/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"power": 1.0})))
            .mount(&server)
            .await;

        let mut rx = service(&server).watch_latest("d-1", Duration::from_millis(20));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.unwrap_err().status(), Some(503));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.unwrap().power, 1.0);
    }
}
