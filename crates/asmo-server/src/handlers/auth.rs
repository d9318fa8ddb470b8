//! PIN login and the `asmo_session` cookie.

use asmo_store::DEFAULT_USER_ID;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::json;

use super::json_body;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

pub const SESSION_COOKIE: &str = "asmo_session";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

fn is_pin_format(pin: &str) -> bool {
    pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit())
}

fn session_cookie(value: &str, max_age_secs: i64) -> String {
    format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age={max_age_secs}"
    )
}

fn with_cookie(mut response: Response, cookie: String) -> ApiResult<Response> {
    let value = HeaderValue::from_str(&cookie)
        .map_err(|_| ApiError::internal("Failed to build session cookie"))?;
    response.headers_mut().insert(header::SET_COOKIE, value);
    Ok(response)
}

/// True if the request carries a live session cookie.
pub(crate) fn has_session(state: &AppState, jar: &CookieJar) -> ApiResult<bool> {
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => Ok(state.auth.session_valid(cookie.value())?),
        None => Ok(false),
    }
}

/// `POST /api/auth`
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = json_body(body)?;
    let pin = request.pin.unwrap_or_default();
    if !is_pin_format(&pin) {
        return Err(ApiError::bad_request("Invalid request"));
    }
    if !state.auth.verify_pin(DEFAULT_USER_ID, &pin)? {
        tracing::info!("Login rejected");
        return Err(ApiError::unauthorized("Invalid PIN"));
    }

    let ttl = chrono::Duration::days(state.config.session_ttl_days);
    let session = state.auth.create_session(DEFAULT_USER_ID, ttl)?;
    tracing::info!(session_id = %session.id, "Session created");

    let response = Json(json!({ "success": true })).into_response();
    with_cookie(response, session_cookie(session.id.as_str(), ttl.num_seconds()))
}

/// `GET /api/auth`: whether the caller's cookie is still valid.
pub async fn session_status(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<serde_json::Value>> {
    let authenticated = has_session(&state, &jar)?;
    Ok(Json(json!({ "authenticated": authenticated })))
}

/// `POST /api/logout`: drop the session and expire the cookie.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Response> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.auth.delete_session(cookie.value())?;
    }
    let response = Json(json!({ "success": true })).into_response();
    with_cookie(response, session_cookie("", 0))
}
