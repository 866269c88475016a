use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::group::{MembershipDeleteRequest, MembershipRequest};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct ByUserQuery {
    pub u_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ByGroupQuery {
    pub g_id: u64,
}

pub async fn list_memberships(State(state): State<AppState>) -> ApiResult {
    let memberships = state.engine.memberships.list().await?;
    Ok((StatusCode::OK, Json(memberships)).into_response())
}

pub async fn by_user(State(state): State<AppState>, Query(q): Query<ByUserQuery>) -> ApiResult {
    let listing = state.engine.memberships.list_by_user(q.u_id).await?;
    Ok((StatusCode::OK, Json(listing)).into_response())
}

pub async fn by_group(State(state): State<AppState>, Query(q): Query<ByGroupQuery>) -> ApiResult {
    let listing = state.engine.memberships.list_by_group(q.g_id).await?;
    Ok((StatusCode::OK, Json(listing)).into_response())
}

pub async fn create_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<MembershipRequest>,
) -> ApiResult {
    let membership = state.engine.memberships.create(&auth.caller(), req).await?;
    Ok((StatusCode::CREATED, Json(membership)).into_response())
}

pub async fn update_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<MembershipRequest>,
) -> ApiResult {
    let membership = state.engine.memberships.update_role(&auth.caller(), req).await?;
    Ok((StatusCode::OK, Json(membership)).into_response())
}

pub async fn delete_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<MembershipDeleteRequest>,
) -> ApiResult {
    state.engine.memberships.delete(&auth.caller(), req).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "membership deleted" }))).into_response())
}
