// followguard/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FraudError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("fatal job error: {0}")]
    FatalJob(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FraudError {
    /// Transient store failures and lost compare-and-set races are worth
    /// another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::Conflict(_))
    }

    /// Short machine-readable kind, used on the wire and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::TransientStore(_) => "transient_store_error",
            Self::FatalJob(_) => "fatal_job_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, FraudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_and_conflict_are_retryable() {
        assert!(FraudError::TransientStore("timeout".into()).is_retryable());
        assert!(FraudError::Conflict("version moved".into()).is_retryable());
        assert!(!FraudError::Validation("bad".into()).is_retryable());
        assert!(!FraudError::FatalJob("population".into()).is_retryable());
    }
}
