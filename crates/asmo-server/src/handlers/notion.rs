//! Notion token checks and database listing for the setup UI.

use asmo_notion::NotionClient;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use axum_extra::extract::CookieJar;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::has_session;
use super::{bearer_token, header_str, json_body};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    #[serde(default)]
    pub api_key: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `POST /api/validate-token`
pub async fn validate_token(
    State(state): State<AppState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let token = non_empty(json_body(body)?.token)
        .ok_or_else(|| ApiError::bad_request("Token is required"))?;
    let valid = state.verifier.validate_token(&token).await?;
    tracing::debug!(valid, "Token validated");
    Ok(Json(json!({ "valid": valid })))
}

/// `POST /api/validate-key`
pub async fn validate_key(
    State(state): State<AppState>,
    body: Result<Json<KeyRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let api_key = non_empty(json_body(body).map_err(ApiError::flagged)?.api_key)
        .ok_or_else(|| ApiError::bad_request("API key is required").flagged())?;
    match state.verifier.validate_key(&api_key).await {
        Ok(true) => Ok(Json(json!({ "success": true }))),
        Ok(false) => Err(ApiError::unauthorized("Invalid API key").flagged()),
        Err(e) => Err(ApiError::from(e).flagged()),
    }
}

/// `GET /api/databases`: databases visible to the caller's Notion token.
pub async fn databases(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if !has_session(&state, &jar)? {
        return Err(ApiError::unauthorized("Unauthorized"));
    }
    let token = header_str(&headers, "x-notion-token")
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| ApiError::bad_request("Notion token required"))?;

    let client = NotionClient::with_base_url(
        SecretString::from(token),
        state.config.notion_api_url.clone(),
    )?;
    let databases = client.list_databases().await.map_err(|e| {
        tracing::warn!(kind = e.error_kind(), error = %e, "Database listing failed");
        if e.is_unauthorized() {
            ApiError::unauthorized("Invalid Notion token")
        } else {
            ApiError::internal("Failed to fetch databases")
        }
    })?;
    Ok(Json(json!({ "databases": databases })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use asmo_notion::{NotionError, TokenVerifier};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Accepts exactly one token.
    struct FixedVerifier(&'static str);

    #[async_trait]
    impl TokenVerifier for FixedVerifier {
        async fn validate_token(&self, token: &str) -> Result<bool, NotionError> {
            Ok(token == self.0)
        }

        async fn validate_key(&self, token: &str) -> Result<bool, NotionError> {
            Ok(token == self.0)
        }
    }

    fn router() -> axum::Router {
        let mut state = AppState::new(ServerConfig {
            port: 0,
            ..Default::default()
        })
        .unwrap();
        state.verifier = Arc::new(FixedVerifier("secret_good"));
        crate::server::build_router(state)
    }

    async fn post(path: &str, body: &str) -> (StatusCode, Value) {
        let resp = router()
            .oneshot(
                Request::post(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn token_validation() {
        let (status, body) = post("/api/validate-token", r#"{"token":"secret_good"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);

        let (status, body) = post("/api/validate-token", r#"{"token":"secret_bad"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
    }

    #[tokio::test]
    async fn missing_token_is_400() {
        let (status, body) = post("/api/validate-token", r#"{}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Token is required");
    }

    #[tokio::test]
    async fn key_validation() {
        let (status, body) = post("/api/validate-key", r#"{"apiKey":"secret_good"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = post("/api/validate-key", r#"{"apiKey":"secret_bad"}"#).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "success": false, "error": "Invalid API key" }));

        let (status, body) = post("/api/validate-key", r#"{}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn databases_require_session() {
        let resp = router()
            .oneshot(
                Request::get("/api/databases")
                    .header("x-notion-token", "secret_good")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
