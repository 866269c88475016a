use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::job::JobSubmission;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

pub async fn submit_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<JobSubmission>,
) -> ApiResult {
    let job = state.engine.jobs.submit(&auth.caller(), req).await?;
    Ok((StatusCode::CREATED, Json(job)).into_response())
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult {
    let jobs = state.engine.jobs.list(&auth.caller()).await?;
    Ok((StatusCode::OK, Json(jobs)).into_response())
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult {
    let job = state.engine.jobs.get(&auth.caller(), id).await?;
    Ok((StatusCode::OK, Json(job)).into_response())
}
