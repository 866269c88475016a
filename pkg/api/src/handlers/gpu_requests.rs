use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::gpu_request::{CreateGpuRequest, ProcessGpuRequest};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

pub async fn create_gpu_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(project_id): AxumPath<u64>,
    Json(req): Json<CreateGpuRequest>,
) -> ApiResult {
    let request = state
        .engine
        .gpu_requests
        .create(&auth.caller(), project_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(request)).into_response())
}

pub async fn list_project_gpu_requests(
    State(state): State<AppState>,
    AxumPath(project_id): AxumPath<u64>,
) -> ApiResult {
    let requests = state.engine.gpu_requests.list_by_project(project_id).await?;
    Ok((StatusCode::OK, Json(requests)).into_response())
}

pub async fn list_pending(State(state): State<AppState>) -> ApiResult {
    let requests = state.engine.gpu_requests.list_pending().await?;
    Ok((StatusCode::OK, Json(requests)).into_response())
}

pub async fn process_gpu_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
    Json(req): Json<ProcessGpuRequest>,
) -> ApiResult {
    let request = state
        .engine
        .gpu_requests
        .process(&auth.caller(), id, req.status)
        .await?;
    Ok((StatusCode::OK, Json(request)).into_response())
}
