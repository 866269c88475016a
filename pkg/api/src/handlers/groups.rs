use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::group::{CreateGroupRequest, UpdateGroupRequest};
use serde_json::json;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

pub async fn list_groups(State(state): State<AppState>) -> ApiResult {
    let groups = state.engine.groups.list().await?;
    Ok((StatusCode::OK, Json(groups)).into_response())
}

pub async fn get_group(State(state): State<AppState>, AxumPath(id): AxumPath<u64>) -> ApiResult {
    let group = state.engine.groups.get(id).await?;
    Ok((StatusCode::OK, Json(group)).into_response())
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult {
    let group = state.engine.groups.create(&auth.caller(), req).await?;
    Ok((StatusCode::CREATED, Json(group)).into_response())
}

pub async fn update_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult {
    let group = state.engine.groups.update(&auth.caller(), id, req).await?;
    Ok((StatusCode::OK, Json(group)).into_response())
}

pub async fn delete_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    state.engine.groups.delete(&auth.caller(), id).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "group deleted" }))).into_response())
}
