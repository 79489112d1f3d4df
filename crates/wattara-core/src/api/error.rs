use thiserror::Error;

use crate::auth::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Validation failed: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("{}", Self::describe_http(.status, .body))]
    Http { status: Option<u16>, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ClientError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    fn describe_http(status: &Option<u16>, body: &str) -> String {
        let body = Self::truncate_body(body);
        match status {
            Some(code) => format!("Request failed with status {}: {}", code, body),
            None => format!("Network error: {}", body),
        }
    }

    /// Error for a non-2xx response. The body is kept whole; only the
    /// display text is truncated.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ClientError::Http {
            status: Some(status.as_u16()),
            body: body.to_string(),
        }
    }

    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => *status,
            _ => None,
        }
    }

    /// The backend's `{"error": "..."}` message carried by an HTTP error, if any.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ClientError::Http { body, .. } => error_field(body),
            ClientError::Auth { reason } => Some(reason.clone()),
            ClientError::Validation { message, .. } => Some(message.clone()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ClientError::InvalidResponse(err.to_string());
        }
        ClientError::Http {
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}

/// Extract the `error` string from a JSON error body.
pub(crate) fn error_field(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}
