use thiserror::Error;

/// Error taxonomy shared by every service in the workspace engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Transient(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        CoreError::NotFound(format!("{} not found", what))
    }

    /// Short machine-readable kind, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not-found",
            CoreError::AlreadyExists(_) => "already-exists",
            CoreError::InvalidInput(_) => "invalid-input",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Conflict(_) => "conflict",
            CoreError::QuotaExceeded(_) => "quota-exceeded",
            CoreError::Transient(_) => "transient",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InvalidInput(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_errors_become_internal() {
        let err: CoreError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(err.kind(), "internal");
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn not_found_message() {
        let err = CoreError::not_found("project 7");
        assert_eq!(err.to_string(), "project 7 not found");
        assert_eq!(err.kind(), "not-found");
    }
}
