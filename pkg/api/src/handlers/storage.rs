use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_manifest::naming::{format_hub_claim, format_storage_namespace, sanitise};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct SizeRequest {
    pub size: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OptionalSizeRequest {
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BrowserRequest {
    pub namespace: String,
    pub claim: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BrowserStopRequest {
    pub namespace: String,
    pub claim: String,
}

// ============================================================
// User storage hubs
// ============================================================

pub async fn hub_status(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
) -> ApiResult {
    let safe = sanitise(&username);
    let hub_state = state.engine.hub.state(&safe).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "username": username,
            "namespace": format_storage_namespace(&safe),
            "claim": format_hub_claim(&safe),
            "state": hub_state,
            "ready": hub_state.is_ready(),
        })),
    )
        .into_response())
}

pub async fn create_hub(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
) -> ApiResult {
    let safe = sanitise(&username);
    let hub_state = state.engine.hub.initialise(&safe).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "username": username,
            "namespace": format_storage_namespace(&safe),
            "state": hub_state,
        })),
    )
        .into_response())
}

pub async fn expand_hub(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
    Json(req): Json<SizeRequest>,
) -> ApiResult {
    state.engine.hub.expand(&sanitise(&username), &req.size).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "storage expanded", "size": req.size })),
    )
        .into_response())
}

pub async fn delete_hub(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
) -> ApiResult {
    state.engine.hub.delete(&sanitise(&username)).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "storage deleted" }))).into_response())
}

// ============================================================
// Project storage
// ============================================================

pub async fn create_project_storage(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
    body: Option<Json<OptionalSizeRequest>>,
) -> ApiResult {
    let size = body.and_then(|Json(b)| b.size);
    let storage = state
        .engine
        .project_storage
        .create(id, size.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(storage)).into_response())
}

pub async fn list_project_storage(State(state): State<AppState>) -> ApiResult {
    let claims = state.engine.project_storage.list().await?;
    Ok((StatusCode::OK, Json(claims)).into_response())
}

pub async fn delete_project_storage(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    state.engine.project_storage.delete(id).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "project storage deleted" }))).into_response())
}

// ============================================================
// File browser
// ============================================================

pub async fn start_browser(
    State(state): State<AppState>,
    Json(req): Json<BrowserRequest>,
) -> ApiResult {
    let owner = sanitise(req.username.as_deref().unwrap_or(&req.namespace));
    let base_url = req.base_url.unwrap_or_else(|| "/".to_string());
    let node_port = state
        .engine
        .hub
        .open_browser(&owner, &req.namespace, &req.claim, req.read_only, &base_url)
        .await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "namespace": req.namespace,
            "claim": req.claim,
            "node_port": node_port,
        })),
    )
        .into_response())
}

pub async fn stop_browser(
    State(state): State<AppState>,
    Json(req): Json<BrowserStopRequest>,
) -> ApiResult {
    state.engine.hub.close_browser(&req.namespace, &req.claim).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "file browser stopped" }))).into_response())
}
