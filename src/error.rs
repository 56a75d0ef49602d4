// Error handling module
// Defines the classified failure returned by every request

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Pseudo-status carried by failures that never produced an HTTP response
pub const NETWORK_STATUS: u16 = 0;

/// Body attached to a failed response
#[derive(Debug, Clone, PartialEq)]
pub enum FailureBody {
    /// Body parsed as JSON
    Json(Value),

    /// Body that was not valid JSON, kept verbatim
    Text(String),
}

impl FailureBody {
    /// Parse a raw response body, falling back to the raw text
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => FailureBody::Json(value),
            Err(_) => FailureBody::Text(text),
        }
    }

    /// Human-readable message extracted from the body
    ///
    /// JSON bodies prefer a string `message` field, then a string `error`
    /// field, and otherwise render the whole document.
    pub fn message(&self) -> String {
        match self {
            FailureBody::Json(value) => ["message", "error"]
                .iter()
                .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            FailureBody::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for FailureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Outcome of a request that did not succeed
///
/// The `Display` form always starts with the numeric status followed by `": "`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// The server answered 401: no valid session
    #[error("401: Not authenticated")]
    AuthRequired,

    /// Any other non-2xx response, or a transport failure with status 0
    #[error("{status}: {body}")]
    RequestFailed { status: u16, body: FailureBody },

    /// A 2xx response whose body could not be decoded into the expected type
    #[error("{status}: invalid response body: {message}")]
    InvalidBody { status: u16, message: String },
}

impl RequestError {
    /// Build a transport failure from its category and description
    pub fn transport(kind: &str, detail: impl fmt::Display) -> Self {
        RequestError::RequestFailed {
            status: NETWORK_STATUS,
            body: FailureBody::Text(format!("{}: {}", kind, detail)),
        }
    }

    /// Build a failure from a non-2xx response
    pub fn from_response(status: u16, body_text: String) -> Self {
        if status == 401 {
            return RequestError::AuthRequired;
        }
        RequestError::RequestFailed {
            status,
            body: FailureBody::from_text(body_text),
        }
    }

    /// HTTP status, or `NETWORK_STATUS` for transport failures
    pub fn status(&self) -> u16 {
        match self {
            RequestError::AuthRequired => 401,
            RequestError::RequestFailed { status, .. } => *status,
            RequestError::InvalidBody { status, .. } => *status,
        }
    }

    /// Parsed or raw body of a failed response
    pub fn body(&self) -> Option<&FailureBody> {
        match self {
            RequestError::RequestFailed { body, .. } => Some(body),
            _ => None,
        }
    }

    /// True only for 401
    pub fn is_auth_required(&self) -> bool {
        matches!(self, RequestError::AuthRequired)
    }

    /// True for 401 and 403, both of which mean "no usable session"
    pub fn is_auth_failure(&self) -> bool {
        match self {
            RequestError::AuthRequired => true,
            RequestError::RequestFailed { status, .. } => *status == 403,
            RequestError::InvalidBody { .. } => false,
        }
    }

    /// True when no HTTP response was received
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RequestError::RequestFailed {
                status: NETWORK_STATUS,
                ..
            }
        )
    }

    /// Transport errors, 429 and 5xx may succeed when tried again
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::RequestFailed { status, .. } => {
                matches!(*status, NETWORK_STATUS | 429 | 500..=599)
            }
            _ => false,
        }
    }
}

/// Result type alias for request operations
pub type Result<T> = std::result::Result<T, RequestError>;
