use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::project::{CreateProjectRequest, UpdateProjectRequest};
use serde_json::json;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

pub async fn list_projects(State(state): State<AppState>) -> ApiResult {
    let projects = state.engine.projects.list().await?;
    Ok((StatusCode::OK, Json(projects)).into_response())
}

/// Projects reachable by the caller through group memberships.
pub async fn list_my_projects(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult {
    let views = state.engine.projects.list_by_user(auth.user_id).await?;
    Ok((StatusCode::OK, Json(views)).into_response())
}

pub async fn get_project(State(state): State<AppState>, AxumPath(id): AxumPath<u64>) -> ApiResult {
    let project = state.engine.projects.get(id).await?;
    Ok((StatusCode::OK, Json(project)).into_response())
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult {
    let project = state.engine.projects.create(&auth.caller(), req).await?;
    Ok((StatusCode::CREATED, Json(project)).into_response())
}

pub async fn update_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult {
    let project = state.engine.projects.update(&auth.caller(), id, req).await?;
    Ok((StatusCode::OK, Json(project)).into_response())
}

pub async fn delete_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    state.engine.projects.delete(&auth.caller(), id).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "project deleted" }))).into_response())
}

pub async fn list_project_config_files(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    let files = state.engine.config_files.list_by_project(id).await?;
    Ok((StatusCode::OK, Json(files)).into_response())
}
