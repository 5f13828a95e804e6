//! Error types for kvscript-store

use thiserror::Error;

/// Errors produced by a key-value store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key holds a value of a different type than the operation expects.
    #[error("WRONGTYPE key {key} holds a {actual}, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A key pattern could not be compiled.
    #[error("invalid key pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Seed data could not be loaded.
    #[error("invalid seed data: {0}")]
    InvalidSeed(String),

    /// Backend-level failure (connection, protocol, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_type_display() {
        let err = StoreError::WrongType {
            key: "user:1".into(),
            expected: "string",
            actual: "hash",
        };
        let msg = err.to_string();
        assert!(msg.contains("WRONGTYPE"));
        assert!(msg.contains("user:1"));
        assert!(msg.contains("hash"));
    }
}
