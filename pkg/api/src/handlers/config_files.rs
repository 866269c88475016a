use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::config_file::{CreateConfigFileRequest, UpdateConfigFileRequest};
use serde_json::json;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

pub async fn list_config_files(State(state): State<AppState>) -> ApiResult {
    let files = state.engine.config_files.list().await?;
    Ok((StatusCode::OK, Json(files)).into_response())
}

pub async fn get_config_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    let file = state.engine.config_files.get(id).await?;
    Ok((StatusCode::OK, Json(file)).into_response())
}

pub async fn list_resources(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    let resources = state.engine.config_files.resources_of(id).await?;
    Ok((StatusCode::OK, Json(resources)).into_response())
}

pub async fn create_config_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateConfigFileRequest>,
) -> ApiResult {
    let created = state
        .engine
        .config_files
        .create(&auth.caller(), req.project_id, &req.filename, &req.raw_yaml)
        .await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn update_config_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
    Json(req): Json<UpdateConfigFileRequest>,
) -> ApiResult {
    let updated = state.engine.config_files.update(&auth.caller(), id, req).await?;
    Ok((StatusCode::OK, Json(updated)).into_response())
}

pub async fn delete_config_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    state.engine.config_files.delete(&auth.caller(), id).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "config file deleted" }))).into_response())
}

/// Apply the config file into the caller's project namespace.
pub async fn create_instance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    let namespace = state.engine.config_files.instantiate(&auth.caller(), id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "instance created", "namespace": namespace })),
    )
        .into_response())
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    let namespace = state.engine.config_files.uninstantiate(&auth.caller(), id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "instance deleted", "namespace": namespace })),
    )
        .into_response())
}
