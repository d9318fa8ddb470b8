//! HTTP route handlers.

pub mod auth;
pub mod memory;
pub mod notion;
pub mod webhook;
pub mod webhook_config;

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderMap};
use axum::Json;

use crate::error::ApiError;

/// Unwrap a JSON body, turning axum's rejection into a 400 in our shape.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected request body");
        ApiError::bad_request("Invalid request body")
    })
}

/// Token from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Value of a plain string header, ignoring empty ones.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
