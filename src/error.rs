//! Error types for the driver API client
//!
//! [`ClientError`] is the internal taxonomy. Every public request method collapses it into
//! the single [`ApiError`] shape before handing it to the caller.

use serde::Serialize;
use thiserror::Error;

/// Status code reported when the request went out but no response came back.
pub const NETWORK_ERROR_STATUS: i32 = 0;

/// Status code reported when the request could not be built or sent at all.
pub const CLIENT_ERROR_STATUS: i32 = -1;

pub(crate) const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";
pub(crate) const SERVER_ERROR_MESSAGE: &str = "Server error occurred";
pub(crate) const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API error {status}")]
    Api {
        status: u16,
        message: Option<String>,
        field_errors: Option<Vec<String>>,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Credential store error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Normalized error surfaced to every caller.
///
/// `status_code` is the HTTP status for server errors, [`NETWORK_ERROR_STATUS`] when no
/// response arrived and [`CLIENT_ERROR_STATUS`] for local failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message} (status {status_code})")]
pub struct ApiError {
    pub message: String,
    pub status_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<Vec<String>>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn network() -> Self {
        Self {
            message: NETWORK_ERROR_MESSAGE.to_string(),
            status_code: NETWORK_ERROR_STATUS,
            field_errors: None,
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: if message.is_empty() {
                UNEXPECTED_ERROR_MESSAGE.to_string()
            } else {
                message
            },
            status_code: CLIENT_ERROR_STATUS,
            field_errors: None,
        }
    }

    /// True when the server rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }

    pub fn is_network(&self) -> bool {
        self.status_code == NETWORK_ERROR_STATUS
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api {
                status,
                message,
                field_errors,
            } => Self {
                message: message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| SERVER_ERROR_MESSAGE.to_string()),
                status_code: i32::from(status),
                field_errors,
            },
            // Builder and decode failures never produced a usable exchange
            ClientError::HttpRequest(e) if e.is_builder() || e.is_decode() => {
                Self::client(e.to_string())
            }
            ClientError::HttpRequest(_) => Self::network(),
            other => Self::client(other.to_string()),
        }
    }
}

/// Extract the message and field errors from a server error body.
///
/// Accepts `errors` as an array of strings or of objects carrying `message`/`msg`.
/// Anything that is not JSON yields `(None, None)`.
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, Option<Vec<String>>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };

    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string);

    let field_errors = value.get("errors").and_then(|e| e.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Object(obj) => obj
                    .get("message")
                    .or_else(|| obj.get("msg"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
    });

    (message, field_errors)
}
