//! Route guards built on [`pkg_controllers::PermissionGate`].
//!
//! Group guards need the id of the group a request targets. It comes
//! either from the JSON payload or from the `{id}` path segment, resolved
//! through the repositories where the id names a project or config file.

use axum::{
    body::{Body, Bytes},
    extract::{FromRequestParts, Path, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pkg_state::Repos;
use pkg_types::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, error_response};

const MAX_GATED_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Which payload field names the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadField {
    /// `g_id`, a group id.
    GroupId,
    /// `project_id`, resolved to the owning group.
    ProjectId,
}

/// What the `{id}` path segment identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLookup {
    Project,
    ConfigFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupIdSource {
    FromPayload(PayloadField),
    FromPathId(PathLookup),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLevel {
    Member,
    Elevated,
}

/// Middleware state for [`require_group`].
#[derive(Clone)]
pub struct GroupGuard {
    state: AppState,
    source: GroupIdSource,
    level: GroupLevel,
}

pub fn group_member(state: &AppState, source: GroupIdSource) -> GroupGuard {
    GroupGuard {
        state: state.clone(),
        source,
        level: GroupLevel::Member,
    }
}

pub fn group_elevated(state: &AppState, source: GroupIdSource) -> GroupGuard {
    GroupGuard {
        state: state.clone(),
        source,
        level: GroupLevel::Elevated,
    }
}

fn payload_u64(body: &[u8], field: &str) -> CoreResult<u64> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| CoreError::InvalidInput(format!("invalid JSON body: {}", e)))?;
    value
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| CoreError::InvalidInput(format!("missing or invalid '{}'", field)))
}

async fn path_id(parts: &mut Parts) -> CoreResult<u64> {
    let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, &())
        .await
        .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
    params
        .get("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| CoreError::InvalidInput("invalid id in path".into()))
}

async fn project_group(repos: &Repos, project_id: u64) -> CoreResult<u64> {
    repos
        .projects
        .group_id_of(project_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("project {}", project_id)))
}

impl GroupIdSource {
    async fn resolve(self, repos: &Repos, parts: &mut Parts, body: &[u8]) -> CoreResult<u64> {
        match self {
            GroupIdSource::FromPayload(PayloadField::GroupId) => payload_u64(body, "g_id"),
            GroupIdSource::FromPayload(PayloadField::ProjectId) => {
                project_group(repos, payload_u64(body, "project_id")?).await
            }
            GroupIdSource::FromPathId(PathLookup::Project) => {
                project_group(repos, path_id(parts).await?).await
            }
            GroupIdSource::FromPathId(PathLookup::ConfigFile) => {
                let id = path_id(parts).await?;
                repos
                    .config_files
                    .group_id_of(id)
                    .await?
                    .ok_or_else(|| CoreError::not_found(format!("config file {}", id)))
            }
        }
    }

    fn reads_payload(self) -> bool {
        matches!(self, GroupIdSource::FromPayload(_))
    }
}

fn auth_user(req: &Request) -> Option<AuthUser> {
    req.extensions().get::<AuthUser>().cloned()
}

fn deny(e: CoreError) -> Response {
    if let CoreError::Forbidden(reason) = &e {
        warn!("Permission denied: {}", reason);
    }
    ApiError(e).into_response()
}

/// Middleware: caller must hold the guard's level in the target group.
/// The payload is buffered and handed on unchanged.
pub async fn require_group(State(guard): State<GroupGuard>, req: Request, next: Next) -> Response {
    let Some(user) = auth_user(&req) else {
        return error_response(StatusCode::UNAUTHORIZED, "not authenticated");
    };
    let (mut parts, body) = req.into_parts();
    let (payload, body) = if guard.source.reads_payload() {
        match axum::body::to_bytes(body, MAX_GATED_BODY_BYTES).await {
            Ok(bytes) => (bytes.clone(), Body::from(bytes)),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    } else {
        (Bytes::new(), body)
    };

    let group_id = match guard
        .source
        .resolve(&guard.state.engine.repos, &mut parts, &payload)
        .await
    {
        Ok(id) => id,
        Err(e) => return deny(e),
    };
    if let Err(e) = check_level(&guard, &user, group_id).await {
        return deny(e);
    }
    next.run(Request::from_parts(parts, body)).await
}

async fn check_level(guard: &GroupGuard, user: &AuthUser, group_id: u64) -> CoreResult<()> {
    let gate = &guard.state.engine.gate;
    match guard.level {
        GroupLevel::Member => gate.require_group_member(user.user_id, group_id).await,
        GroupLevel::Elevated => gate.require_group_elevated(user.user_id, group_id).await,
    }
}

/// Middleware: caller must be a super-admin.
pub async fn require_super_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(user) = auth_user(&req) else {
        return error_response(StatusCode::UNAUTHORIZED, "not authenticated");
    };
    match state.engine.gate.require_super_admin(user.user_id).await {
        Ok(()) => next.run(req).await,
        Err(e) => deny(e),
    }
}

/// Middleware: the `{id}` path segment must be the caller, unless the
/// caller is a super-admin.
pub async fn require_user_or_super(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(user) = auth_user(&req) else {
        return error_response(StatusCode::UNAUTHORIZED, "not authenticated");
    };
    let (mut parts, body) = req.into_parts();
    let target = match path_id(&mut parts).await {
        Ok(id) => id,
        Err(e) => return deny(e),
    };
    match state.engine.gate.require_user_or_super(user.user_id, target).await {
        Ok(()) => next.run(Request::from_parts(parts, body)).await,
        Err(e) => deny(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_fields() {
        assert_eq!(payload_u64(br#"{"g_id": 4, "role": "user"}"#, "g_id").unwrap(), 4);
        assert!(matches!(
            payload_u64(br#"{"g_id": "four"}"#, "g_id"),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(payload_u64(b"not json", "g_id"), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn only_payload_sources_buffer_the_body() {
        assert!(GroupIdSource::FromPayload(PayloadField::ProjectId).reads_payload());
        assert!(!GroupIdSource::FromPathId(PathLookup::ConfigFile).reads_payload());
    }
}
