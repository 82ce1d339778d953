//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: errors surfaced by the HTTP API (config endpoints, call
//!   webhook). These convert into JSON HTTP responses.
//! - **BridgeError**: errors on the media path of a live call. These never
//!   reach an HTTP client; the session decides per category whether to drop a
//!   message, reset the turn, or tear the call down.
//!
//! ## BridgeError Categories:
//! | Variant | Example | Session reaction |
//! |---------|---------|------------------|
//! | `Transport` | send on a closed socket | abort current operation, no retry |
//! | `Protocol` | malformed JSON or base64 | discard the message, continue |
//! | `Remote` | speech service `error` event | reset turn state to idle |
//! | `ConnectionClosed` | either socket closed | tear down the session |
//! | `Config` | threshold of zero | reject session construction |

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned from HTTP handlers.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::ValidationError("frame_ms must be 20".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The server is at its concurrent call limit
    Overloaded(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Overloaded(msg) => write!(f, "Overloaded: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses with a consistent JSON body:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "min_submission_ms must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::Overloaded(msg) => ("overloaded", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Errors on the media path of a live call.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A send on either socket failed
    Transport(String),

    /// A received message or payload could not be parsed
    Protocol(String),

    /// The speech service reported an error for the current response
    Remote(String),

    /// A socket closed; carries which leg ("telephony" or "realtime")
    ConnectionClosed(&'static str),

    /// Session tunables are inconsistent
    Config(String),
}

impl BridgeError {
    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::ConnectionClosed(_) | BridgeError::Config(_))
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Transport(msg) => write!(f, "Transport error: {}", msg),
            BridgeError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BridgeError::Remote(msg) => write!(f, "Remote error: {}", msg),
            BridgeError::ConnectionClosed(leg) => write!(f, "Connection closed: {}", leg),
            BridgeError::Config(msg) => write!(f, "Session configuration error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(format!("invalid JSON: {}", err))
    }
}

impl From<base64::DecodeError> for BridgeError {
    fn from(err: base64::DecodeError) -> Self {
        BridgeError::Protocol(format!("invalid base64 payload: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Overloaded("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_bridge_error_fatality() {
        assert!(BridgeError::ConnectionClosed("telephony").is_fatal());
        assert!(!BridgeError::Transport("gone".into()).is_fatal());
        assert!(!BridgeError::Protocol("bad".into()).is_fatal());

        let err: BridgeError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }
}
