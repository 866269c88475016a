use axum::{
    Extension, Json,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use pkg_types::audit::Actor;
use pkg_types::user::{
    LoginRequest, LoginResponse, RegisterRequest, UpdateUserRequest, UserView,
};
use serde_json::json;
use tracing::{info, warn};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiResult, error_response};

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult {
    let actor = Actor {
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ..Actor::system()
    };
    let user = state.engine.accounts.register(req, &actor).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))).into_response())
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult {
    let Some(user) = state
        .engine
        .accounts
        .authenticate(&req.username, &req.password)
        .await?
    else {
        warn!("Failed login for {}", req.username);
        return Ok(error_response(StatusCode::UNAUTHORIZED, "invalid username or password"));
    };
    let is_admin = state.engine.gate.is_super_admin(user.id).await?;
    let token = state.tokens.issue(user.id, &user.username, is_admin)?;
    info!("User {} logged in", user.username);
    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            token,
            user_id: user.id,
            username: user.username,
            is_admin,
        }),
    )
        .into_response())
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult {
    let users: Vec<UserView> = state
        .engine
        .accounts
        .list()
        .await?
        .iter()
        .map(UserView::from)
        .collect();
    Ok((StatusCode::OK, Json(users)).into_response())
}

pub async fn get_user(State(state): State<AppState>, AxumPath(id): AxumPath<u64>) -> ApiResult {
    let user = state.engine.accounts.get(id).await?;
    Ok((StatusCode::OK, Json(UserView::from(&user))).into_response())
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult {
    let user = state.engine.accounts.update(&auth.caller(), id, req).await?;
    Ok((StatusCode::OK, Json(UserView::from(&user))).into_response())
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(id): AxumPath<u64>,
) -> ApiResult<Response> {
    state.engine.accounts.delete(&auth.caller(), id).await?;
    Ok((StatusCode::OK, Json(json!({ "message": "user deleted" }))).into_response())
}
