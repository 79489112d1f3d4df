use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ClientError;

/// An outbound call, kept whole so it can be replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
            retried: false,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Whether this call has already been replayed after a 401.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// A completed response with its body read into memory.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    pub(crate) fn new(status: StatusCode, body: String) -> Self {
        Self { status, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn into_text(self) -> String {
        self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ClientError::InvalidResponse(format!("{} (status {})", e, self.status.as_u16()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header;

    #[test]
    fn test_pending_request_builder() {
        let pending = PendingRequest::new(Method::POST, "/monitoring/devices/")
            .json(serde_json::json!({"name": "Kitchen"}))
            .header(header::ACCEPT, HeaderValue::from_static("application/json"));

        assert_eq!(pending.path, "/monitoring/devices/");
        assert_eq!(pending.body.as_ref().unwrap()["name"], "Kitchen");
        assert_eq!(pending.headers.get(header::ACCEPT).unwrap(), "application/json");
        assert!(!pending.is_retried());
    }

    #[test]
    fn test_json_decode_failure() {
        let response = ApiResponse::new(StatusCode::OK, "<html>".to_string());
        let err = response.json::<Value>().unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(ref msg) if msg.contains("status 200")));
    }
}
