use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use pkg_controllers::Caller;
use pkg_types::user::UserStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::AppState;
use crate::error::error_response;

/// Information about the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuthUser {
    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id,
            username: self.username.clone(),
            source_ip: self.source_ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Bearer token from the `Authorization` header, or `?token=` for
/// WebSocket upgrades where browsers cannot set headers.
fn bearer_token(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        return value.strip_prefix("Bearer ").map(|t| t.trim().to_string());
    }
    req.uri().query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "token")
            .map(|(_, v)| v.to_string())
    })
}

fn header_str(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Middleware: Authenticates the request using a Bearer token and injects
/// [`AuthUser`] into the request extensions.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&req) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing bearer token");
    };
    let claims = match state.tokens.verify(&token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Rejected token: {}", e);
            return error_response(StatusCode::UNAUTHORIZED, "invalid or expired token");
        }
    };
    let user = match state.engine.repos.users.get(claims.uid).await {
        Ok(Some(user)) if user.status != UserStatus::Deleted => user,
        Ok(_) => return error_response(StatusCode::UNAUTHORIZED, "account no longer exists"),
        Err(e) => {
            warn!("User lookup failed during auth: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "authentication unavailable");
        }
    };

    let source_ip = header_str(&req, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .or_else(|| header_str(&req, "x-real-ip"));
    let auth_user = AuthUser {
        user_id: user.id,
        username: user.username,
        source_ip,
        user_agent: header_str(&req, header::USER_AGENT.as_str()),
    };
    debug!("Authenticated {} for {}", auth_user.username, req.uri().path());
    req.extensions_mut().insert(auth_user);
    next.run(req).await
}
