//! HTTP error responses.

use asmo_core::RelayError;
use asmo_notion::NotionError;
use asmo_store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error body shape expected by the caller of a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorShape {
    /// `{"error": "..."}`
    Plain,
    /// `{"success": false, "error": "..."}`
    Flagged,
}

/// A failed request: status, message, and body shape.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub shape: ErrorShape,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            shape: ErrorShape::Plain,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Switch to the `{success:false,error}` body.
    pub fn flagged(mut self) -> Self {
        self.shape = ErrorShape::Flagged;
        self
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &e {
            RelayError::NotConnected => "Webhook not found".to_string(),
            other => other.to_string(),
        };
        Self::new(status, message)
    }
}

impl From<NotionError> for ApiError {
    fn from(e: NotionError) -> Self {
        tracing::warn!(kind = e.error_kind(), error = %e, "Notion request failed");
        if e.is_unauthorized() {
            Self::unauthorized("Invalid Notion token")
        } else {
            Self::internal(e.to_string())
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Store error");
        Self::internal("Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.shape {
            ErrorShape::Plain => json!({ "error": self.message }),
            ErrorShape::Flagged => json!({ "success": false, "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn relay_errors_map_to_statuses() {
        let cases = [
            (RelayError::NotConnected, 404),
            (RelayError::NotInitialized, 503),
            (RelayError::Rejected("boom".into()), 502),
            (RelayError::Timeout(Duration::from_secs(30)), 504),
            (RelayError::AlreadyPending, 409),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status.as_u16(), status);
        }
    }

    #[test]
    fn not_connected_message() {
        let err = ApiError::from(RelayError::NotConnected);
        assert_eq!(err.message, "Webhook not found");
    }

    #[test]
    fn rejected_keeps_browser_message() {
        let err = ApiError::from(RelayError::Rejected("no such page".into()));
        assert!(err.message.contains("no such page"));
    }

    #[test]
    fn notion_unauthorized_is_401() {
        let err = ApiError::from(NotionError::Api {
            status: 401,
            code: "unauthorized".into(),
            message: "bad".into(),
        });
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        let err = ApiError::from(NotionError::Network("reset".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn flagged_shape() {
        let err = ApiError::unauthorized("Invalid API key").flagged();
        assert_eq!(err.shape, ErrorShape::Flagged);
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
