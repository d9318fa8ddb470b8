//! Outbound webhook configuration: verify the database, probe the target
//! URL, remember the config.

use asmo_notion::NotionClient;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::auth::has_session;
use super::{bearer_token, json_body};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfigRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub database_id: String,
    #[serde(default)]
    pub manual_content: Option<String>,
}

/// A configured outbound webhook, keyed by database id.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    pub events: Vec<String>,
    pub database_id: String,
    pub configured_at: DateTime<Utc>,
}

impl WebhookConfigRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        let url = self.url.trim();
        let has_host = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'));
        if !has_host || reqwest::Url::parse(url).is_err() {
            return Err("Invalid webhook URL");
        }
        if self.events.is_empty() {
            return Err("At least one event is required");
        }
        if self.database_id.trim().is_empty() {
            return Err("Database ID is required");
        }
        Ok(())
    }
}

async fn deliver(state: &AppState, url: &str, payload: &Value, failure: &'static str) -> ApiResult<()> {
    let response = state.http.post(url).json(payload).send().await.map_err(|e| {
        tracing::warn!(url, error = %e, "Webhook delivery failed");
        ApiError::bad_request(failure).flagged()
    })?;
    if !response.status().is_success() {
        tracing::warn!(url, status = response.status().as_u16(), "Webhook target rejected delivery");
        return Err(ApiError::bad_request(failure).flagged());
    }
    Ok(())
}

/// `POST /api/webhook-config`
pub async fn configure(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<WebhookConfigRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("No API key provided").flagged())?
        .to_string();
    let request = json_body(body).map_err(ApiError::flagged)?;
    request
        .validate()
        .map_err(|reason| ApiError::bad_request(reason).flagged())?;

    let client = NotionClient::with_base_url(
        SecretString::from(token),
        state.config.notion_api_url.clone(),
    )
    .map_err(|e| ApiError::from(e).flagged())?;
    client.retrieve_database(&request.database_id).await.map_err(|e| {
        tracing::info!(database_id = %request.database_id, error = %e, "Database not accessible");
        ApiError::new(StatusCode::BAD_REQUEST, "Database is not accessible with this token").flagged()
    })?;

    if let Some(content) = request.manual_content.as_deref().filter(|c| !c.is_empty()) {
        let payload = json!({
            "type": "manual",
            "content": content,
            "databaseId": request.database_id,
        });
        deliver(&state, &request.url, &payload, "Failed to send manual content").await?;
    }

    let payload = json!({
        "type": "test",
        "databaseId": request.database_id,
        "events": request.events,
        "timestamp": Utc::now().to_rfc3339(),
    });
    deliver(&state, &request.url, &payload, "Failed to reach webhook URL").await?;

    let config = WebhookConfig {
        url: request.url.trim().to_string(),
        events: request.events,
        database_id: request.database_id.clone(),
        configured_at: Utc::now(),
    };
    state.webhook_configs.insert(request.database_id.clone(), config);
    tracing::info!(database_id = %request.database_id, "Webhook configured");

    Ok(Json(json!({
        "success": true,
        "message": "Webhook configured successfully",
    })))
}

fn require_session(state: &AppState, jar: &CookieJar) -> ApiResult<()> {
    if has_session(state, jar).map_err(ApiError::flagged)? {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Unauthorized").flagged())
    }
}

/// `GET /api/webhook-config`: configured webhooks, newest first.
pub async fn list(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Json<Value>> {
    require_session(&state, &jar)?;
    let mut configs: Vec<WebhookConfig> = state
        .webhook_configs
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    configs.sort_by(|a, b| b.configured_at.cmp(&a.configured_at));
    Ok(Json(json!({ "success": true, "data": configs })))
}

/// `DELETE /api/webhook-config/{database_id}`
pub async fn remove(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(database_id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &jar)?;
    if state.webhook_configs.remove(&database_id).is_none() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Webhook config not found").flagged());
    }
    tracing::info!(database_id = %database_id, "Webhook config removed");
    Ok(Json(json!({ "success": true })))
}
