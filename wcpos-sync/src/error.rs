//! Error types for the sync layer.

use std::fmt;
use thiserror::Error;
use wcpos_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Code reported when a failure carries no server-supplied code.
pub const SERVICE_UNAVAILABLE: &str = "service_unavailable";

/// Why an in-flight request was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The transport is re-authenticating and dropped pending requests.
    Reauthentication,
    /// The owning component was cancelled.
    Aborted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Reauthentication => f.write_str("re-authentication"),
            CancelReason::Aborted => f.write_str("aborted"),
        }
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure (connection refused, DNS, TLS...).
    #[error("network error: {0}")]
    Network(String),

    /// The request was cancelled before a response was acted on.
    #[error("request cancelled: {reason}")]
    Cancelled { reason: CancelReason },

    /// The app is suspended; requests are not being sent.
    #[error("app is suspended")]
    Suspended,

    /// The server answered with a body of the wrong shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server reported a failure.
    #[error("server error {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Server {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record could not be turned into a local document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// No query is registered under this id.
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The owning component has been cancelled.
    #[error("closed")]
    Closed,
}

impl SyncError {
    /// Returns true for expected interruptions that are neither logged as
    /// failures nor surfaced to the user: cancellations and suspension.
    pub fn is_silent(&self) -> bool {
        matches!(self, SyncError::Cancelled { .. } | SyncError::Suspended)
    }

    /// Returns true if the request was dropped because the transport is
    /// re-authenticating.
    pub fn is_reauthentication(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled {
                reason: CancelReason::Reauthentication
            }
        )
    }

    /// Server-supplied error code, or [`SERVICE_UNAVAILABLE`].
    pub fn code(&self) -> &str {
        match self {
            SyncError::Server {
                code: Some(code), ..
            } => code,
            _ => SERVICE_UNAVAILABLE,
        }
    }

    /// Server-supplied message, or this error's own description.
    pub fn message(&self) -> String {
        match self {
            SyncError::Server {
                message: Some(message),
                ..
            } => message.clone(),
            other => other.to_string(),
        }
    }
}
