use pkg_types::CoreError;
use thiserror::Error;

/// Failure kinds surfaced by every cluster call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("malformed object: {0}")]
    Malformed(String),
    #[error("unknown kind: {0}")]
    UnknownKind(String),
    #[error("cluster unavailable: {0}")]
    Transient(String),
    #[error("{0}")]
    Internal(String),
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }
}

/// Collapse not-found into success.
pub(crate) fn ignore_not_found(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Collapse not-found and unknown-kind into success.
pub(crate) fn ignore_gone(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(ClusterError::NotFound(_)) | Err(ClusterError::UnknownKind(_)) => Ok(()),
        other => other,
    }
}

/// Collapse already-exists into success.
pub(crate) fn ignore_already_exists(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClusterError::NotFound(resp.message),
                409 if resp.reason == "AlreadyExists" => ClusterError::AlreadyExists(resp.message),
                409 => ClusterError::Conflict(resp.message),
                403 => ClusterError::Forbidden(resp.message),
                400 | 422 => ClusterError::Malformed(resp.message),
                429 | 500..=599 => ClusterError::Transient(resp.message),
                _ => ClusterError::Internal(resp.message),
            },
            kube::Error::Discovery(e) => ClusterError::UnknownKind(e.to_string()),
            kube::Error::HyperError(e) => ClusterError::Transient(e.to_string()),
            kube::Error::Service(e) => ClusterError::Transient(e.to_string()),
            other => ClusterError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Malformed(err.to_string())
    }
}

impl From<ClusterError> for CoreError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound(m) => CoreError::NotFound(m),
            ClusterError::AlreadyExists(m) => CoreError::AlreadyExists(m),
            ClusterError::Conflict(m) => CoreError::Conflict(m),
            ClusterError::Forbidden(m) => CoreError::Forbidden(m),
            ClusterError::Malformed(m) => CoreError::InvalidInput(format!("malformed object: {}", m)),
            ClusterError::UnknownKind(m) => CoreError::InvalidInput(format!("unknown kind: {}", m)),
            ClusterError::Transient(m) => CoreError::Transient(m),
            ClusterError::Internal(m) => CoreError::Internal(anyhow::anyhow!(m)),
        }
    }
}
