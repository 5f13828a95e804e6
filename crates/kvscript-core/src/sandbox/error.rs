//! Error types for the sandbox module.

use serde::{Deserialize, Serialize};

/// Failure taxonomy for a script execution.
///
/// Validation and security failures are raised before the store is touched.
/// Compile, runtime and timeout failures are caught at the execution
/// boundary and reported through an [`ExecutionOutcome`](super::ExecutionOutcome).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("security violation: script contains forbidden {category}: {token}")]
    SecurityViolation {
        category: &'static str,
        token: String,
    },

    #[error("compile error: {0}")]
    Compile(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("script execution timeout after {limit_ms}ms")]
    Timeout { limit_ms: u64 },
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::Validation(_) => ErrorKind::Validation,
            ScriptError::SecurityViolation { .. } => ErrorKind::SecurityViolation,
            ScriptError::Compile(_) => ErrorKind::Compile,
            ScriptError::Runtime(_) => ErrorKind::Runtime,
            ScriptError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Serializable tag for a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    SecurityViolation,
    Compile,
    Runtime,
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::SecurityViolation => write!(f, "security_violation"),
            ErrorKind::Compile => write!(f, "compile"),
            ErrorKind::Runtime => write!(f, "runtime"),
            ErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result type for sandbox operations.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_user_visible_keywords() {
        assert!(ScriptError::Validation("empty script".into())
            .to_string()
            .contains("empty"));
        assert!(ScriptError::SecurityViolation {
            category: "pattern",
            token: "FLUSHALL".into(),
        }
        .to_string()
        .contains("forbidden pattern: FLUSHALL"));
        assert_eq!(
            ScriptError::Timeout { limit_ms: 100 }.to_string(),
            "script execution timeout after 100ms"
        );
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ScriptError::Compile("x".into()).kind(),
            ErrorKind::Compile
        );
        assert_eq!(
            ScriptError::Runtime("x".into()).kind(),
            ErrorKind::Runtime
        );
        assert_eq!(ErrorKind::SecurityViolation.to_string(), "security_violation");
    }

    #[test]
    fn test_error_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
