//! Memory routes, guarded by the shared `api-key` header.

use std::sync::Arc;

use asmo_notion::{GroupAssignment, MemoryQuery, MemoryService, NewMemory, NotionError};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{header_str, json_body};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    #[serde(flatten)]
    pub memory: NewMemory,
    #[serde(default)]
    pub area_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    #[serde(default)]
    pub memory_id: String,
    #[serde(default)]
    pub group_code: String,
}

/// Compare fixed-length digests without an early exit, so timing does not
/// depend on how much of the key matched.
fn keys_match(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Check the `api-key` header and hand back the memory service.
fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<Arc<MemoryService>> {
    let expected = state.config.api_secret_key.as_ref();
    let provided = header_str(headers, "api-key");
    match (expected, provided) {
        (Some(expected), Some(provided)) if keys_match(expected.expose_secret(), provided) => {}
        _ => return Err(ApiError::unauthorized("Unauthorized: Invalid API Key").flagged()),
    }
    state.memory.clone().ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Memory storage is not configured").flagged()
    })
}

fn notion_failure(context: &'static str) -> impl FnOnce(NotionError) -> ApiError {
    move |e| {
        tracing::error!(kind = e.error_kind(), error = %e, "{context}");
        ApiError::internal(context).flagged()
    }
}

/// `POST /api/memory`
pub async fn store(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StoreRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let service = authorize(&state, &headers)?;
    let StoreRequest {
        mut memory,
        area_name,
    } = json_body(body).map_err(ApiError::flagged)?;
    if memory.message.trim().is_empty() {
        return Err(ApiError::bad_request("Bad Request: \"message\" is required").flagged());
    }

    if let Some(area) = area_name.filter(|a| !a.trim().is_empty()) {
        let area_id = service
            .assign_memory_area(&area)
            .await
            .map_err(notion_failure("Failed to assign memory area"))?;
        memory.memory_area_id = Some(area_id);
    }

    let page = service
        .store_memory(&memory)
        .await
        .map_err(notion_failure("Failed to store memory"))?;
    Ok(Json(json!({ "success": true, "data": page })))
}

/// `POST /api/memory/search`
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MemoryQuery>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let service = authorize(&state, &headers)?;
    let query = json_body(body).map_err(ApiError::flagged)?;
    let results = service
        .retrieve_memories(&query)
        .await
        .map_err(notion_failure("Failed to retrieve memories"))?;
    Ok(Json(json!({ "success": true, "data": results })))
}

/// `POST /api/memory/group`
pub async fn group(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GroupRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let service = authorize(&state, &headers)?;
    let request = json_body(body).map_err(ApiError::flagged)?;
    if request.memory_id.trim().is_empty() || request.group_code.trim().is_empty() {
        return Err(
            ApiError::bad_request("Bad Request: \"memoryId\" and \"groupCode\" are required")
                .flagged(),
        );
    }

    let assignment = service
        .assign_memory_to_group(&request.memory_id, &request.group_code)
        .await
        .map_err(notion_failure("Failed to assign memory to group"))?;
    let (group_id, created) = match assignment {
        GroupAssignment::Existing { group_id } => (group_id, false),
        GroupAssignment::Created { group_id } => (group_id, true),
    };
    Ok(Json(json!({
        "success": true,
        "data": { "groupId": group_id, "created": created },
    })))
}
