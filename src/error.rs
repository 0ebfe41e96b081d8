//! Unified error types.

use std::time::Duration;

use thiserror::Error;

/// Top-level error for the live telemetry layer.
///
/// Failures are absorbed per server into connection status and health; these
/// values only surface to the caller of the attempt that produced them.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Authentication rejected by agent")]
    AuthRejected,

    #[error("No authentication verdict within {0:?}")]
    AuthTimeout(Duration),

    #[error("Connection attempt aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

/// Result alias for live manager operations.
pub type LiveResult<T> = Result<T, LiveError>;

/// HTTP-layer errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Timeout")]
    Timeout,

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// Errors from the token provider.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Token request rejected: {message} (code: {code:?})")]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("Invalid token response: {0}")]
    Invalid(String),
}

/// WebSocket errors.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Timeout")]
    Timeout,
}

#[cfg(feature = "ws-native")]
impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed => WsError::Closed {
                code: Some(1000),
                reason: "Connection closed normally".to_string(),
            },
            Error::AlreadyClosed => WsError::NotConnected,
            Error::Http(resp) => {
                WsError::ConnectionFailed(format!("HTTP error: {:?}", resp.status()))
            }
            other => WsError::ConnectionFailed(other.to_string()),
        }
    }
}
