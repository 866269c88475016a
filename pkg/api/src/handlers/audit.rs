use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use pkg_types::CoreError;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiResult;

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub resource_type: Option<String>,
}

/// Most recent audit events first.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> ApiResult {
    let limit = q.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_AUDIT_LIMIT);
    let mut events = state
        .engine
        .repos
        .audit
        .list_recent(limit)
        .await
        .map_err(CoreError::Internal)?;
    if let Some(kind) = q.resource_type.as_deref() {
        events.retain(|e| e.resource_type == kind);
    }
    Ok((StatusCode::OK, Json(events)).into_response())
}
