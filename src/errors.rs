use thiserror::Error;

/// Typed error hierarchy for the gateway.
///
/// Use at module boundaries (validation, adapter calls, persistence, CLI
/// execution). Internal/leaf functions can continue using `anyhow::Result`;
/// the `Internal` variant converts via the `?` operator.
#[derive(Debug, Error)]
pub enum ForceError {
    #[error("Invalid parameter '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Parameter '{param}' is not supported by model '{model}'")]
    UnsupportedCapability { param: String, model: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend rejected request: {0}")]
    BackendRejected(String),

    #[error("Transient backend error: {message}")]
    BackendTransient {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using ForceError.
pub type ForceResult<T> = std::result::Result<T, ForceError>;

impl ForceError {
    /// Whether this error is retryable (rate limits, 5xx, network drops).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForceError::BackendTransient { .. })
    }

    /// Short machine-readable kind string surfaced over the transport.
    pub fn kind(&self) -> &'static str {
        match self {
            ForceError::InvalidParameter { .. } => "invalid-parameter",
            ForceError::UnsupportedCapability { .. } => "unsupported-capability",
            ForceError::NotFound(_) => "not-found",
            ForceError::BackendUnavailable(_) => "backend-unavailable",
            ForceError::BackendRejected(_) => "backend-rejected",
            ForceError::BackendTransient { .. } => "backend-transient",
            ForceError::Timeout { .. } => "timeout",
            ForceError::Cancelled => "cancelled",
            ForceError::ToolExecutionFailed { .. } => "tool-execution-failed",
            ForceError::Parse(_) => "parse-error",
            ForceError::Storage(_) => "storage-error",
            ForceError::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for ForceError {
    fn from(e: rusqlite::Error) -> Self {
        ForceError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_display() {
        let err = ForceError::InvalidParameter {
            param: "temperature".into(),
            message: "expected float".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameter 'temperature': expected float"
        );
        assert_eq!(err.kind(), "invalid-parameter");
    }

    #[test]
    fn transient_is_retryable() {
        let err = ForceError::BackendTransient {
            message: "503".into(),
            retry_after: Some(30),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn rejected_not_retryable() {
        let err = ForceError::BackendRejected("model not found".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "backend-rejected");
    }

    #[test]
    fn internal_from_anyhow() {
        let err: ForceError = anyhow::anyhow!("something broke").into();
        assert!(matches!(err, ForceError::Internal(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_from_rusqlite() {
        let err: ForceError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), "storage-error");
    }
}
