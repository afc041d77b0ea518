use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ThrongarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration is invalid: {0}")]
    ConfigInvalid(String),

    #[error("template error: {0}")]
    TemplateError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("check failed: {0}")]
    CheckFailed(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("hook error: {0}")]
    HookError(String),

    #[error("CSV provider exhausted: {0}")]
    CsvExhausted(String),

    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),

    #[error("worker busy: {0}")]
    WorkerBusy(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Serialize for ThrongarError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl ThrongarError {
    /// Process exit code this error maps to at the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            ThrongarError::Fatal(_) | ThrongarError::WorkerUnreachable(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ThrongarError::Validation("field X is required".to_string());
        assert_eq!(err.to_string(), "Validation error: field X is required");
    }

    #[test]
    fn config_invalid_display() {
        let err = ThrongarError::ConfigInvalid("missing base_url".to_string());
        assert_eq!(err.to_string(), "configuration is invalid: missing base_url");
    }

    #[test]
    fn timeout_display() {
        let err = ThrongarError::Timeout(5000);
        assert_eq!(err.to_string(), "timed out after 5000ms");
    }

    #[test]
    fn fatal_exit_code_is_two() {
        assert_eq!(ThrongarError::Fatal("boom".into()).exit_code(), 2);
        assert_eq!(ThrongarError::WorkerUnreachable("host".into()).exit_code(), 2);
    }

    #[test]
    fn non_fatal_exit_code_is_one() {
        assert_eq!(ThrongarError::CheckFailed("x".into()).exit_code(), 1);
        assert_eq!(ThrongarError::Validation("x".into()).exit_code(), 1);
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ThrongarError = io_err.into();
        let msg = err.to_string();
        assert!(msg.contains("IO error"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn serde_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: ThrongarError = json_err.into();
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn serialize_produces_string() {
        let err = ThrongarError::Validation("test error".to_string());
        let json = serde_json::to_string(&err).expect("serialize should succeed");
        assert_eq!(json, "\"Validation error: test error\"");
    }

    #[test]
    fn error_is_debug() {
        let err = ThrongarError::Validation("test".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("Validation"));
    }
}
