use std::time::Duration;

use serde::Serialize;

/// Failure outcomes of a relay call. All are recoverable and reported to
/// the immediate caller; none terminate the process.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("webhook not connected")]
    NotConnected,
    #[error("notion client not initialized")]
    NotInitialized,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
    #[error("a request is already pending for this webhook")]
    AlreadyPending,
}

/// Stable reason codes, as they appear on the wire and in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotConnected,
    NotInitialized,
    Timeout,
    Rejected,
    AlreadyPending,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::NotInitialized => "not_initialized",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::AlreadyPending => "already_pending",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotConnected => ErrorCode::NotConnected,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Rejected(_) => ErrorCode::Rejected,
            Self::AlreadyPending => ErrorCode::AlreadyPending,
        }
    }

    /// HTTP status the front door reports for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotConnected => 404,
            Self::AlreadyPending => 409,
            Self::Rejected(_) => 502,
            Self::NotInitialized => 503,
            Self::Timeout(_) => 504,
        }
    }
}
