use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_types::CoreError;
use serde_json::json;
use tracing::{error, warn};

/// A service error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

pub type ApiResult<T = Response> = Result<T, ApiError>;

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(CoreError::Internal(e))
    }
}

pub fn status_of(e: &CoreError) -> StatusCode {
    match e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::AlreadyExists(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::Forbidden(_) | CoreError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
        CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `{"error": message}` with the given status.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        match &self.0 {
            CoreError::Internal(e) => error!("Internal error: {:#}", e),
            CoreError::Transient(m) => warn!("Transient error: {}", m),
            _ => {}
        }
        error_response(status, self.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(status_of(&CoreError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&CoreError::QuotaExceeded("q".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(&CoreError::AlreadyExists("a".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&CoreError::Transient("t".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&anyhow::anyhow!("boom").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
