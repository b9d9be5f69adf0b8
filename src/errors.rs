// Copyright 2025 Cowboy AI, LLC.

//! Error types for persistence operations

use thiserror::Error;

use crate::specification::QueryBackend;
use crate::storage::Permission;

/// A malformed boolean query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parse error at position {position} near '{token}': {message}")]
pub struct ParseError {
    /// Byte offset of the offending token in the input
    pub position: usize,
    /// Text of the offending token, `<end of input>` when the input ran out
    pub token: String,
    /// What the parser expected
    pub message: String,
}

impl ParseError {
    /// Token text used when the input ended early
    pub const END_OF_INPUT: &'static str = "<end of input>";

    /// Create a parse error at a token
    pub fn new(position: usize, token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            position,
            token: token.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur in persistence operations
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// Query text could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Specification tree cannot be compiled for the requested backend
    #[error("Unsupported query backend {backend} for {criterion}")]
    UnsupportedQueryBackend {
        /// Backend that was requested
        backend: QueryBackend,
        /// Debug rendering of the first unsupported leaf
        criterion: String,
    },

    /// Caller lacks a permission
    #[error("Permission denied: {user} may not {permission} {target}")]
    PermissionDenied {
        /// Permission that was checked
        permission: Permission,
        /// Username of the caller
        user: String,
        /// Key or value that was protected
        target: String,
    },

    /// Duplicate key insert, or update/delete of a missing key
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Authoritative counter could not be advanced
    #[error("Sequence {sequence} exhausted: {reason}")]
    AllocatorExhaustion {
        /// Sequence name
        sequence: String,
        /// Underlying failure
        reason: String,
    },

    /// Transient storage failure reported by an adapter
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unit of work could not be opened, committed or rolled back
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration rejected by a builder
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A lock was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

impl PersistenceError {
    /// Create an integrity violation
    pub fn integrity(msg: impl Into<String>) -> Self {
        PersistenceError::IntegrityViolation(msg.into())
    }

    /// Check if this is a permission denial
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PersistenceError::PermissionDenied { .. })
    }

    /// Check if this is an integrity violation
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, PersistenceError::IntegrityViolation(_))
    }

    /// Check if this is a backend capability error
    pub fn is_unsupported_backend(&self) -> bool {
        matches!(self, PersistenceError::UnsupportedQueryBackend { .. })
    }

    /// Check if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PersistenceError::Storage(_) | PersistenceError::Transaction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test error display messages
    ///
    /// ```mermaid
    /// graph TD
    ///     A[PersistenceError] -->|Display| B[Error Message]
    ///     A -->|Clone| C[Cloned Error]
    /// ```
    #[test]
    fn test_error_display_messages() {
        let err = PersistenceError::from(ParseError::new(7, "AND", "expected a term"));
        assert_eq!(
            err.to_string(),
            "Parse error at position 7 near 'AND': expected a term"
        );

        let err = PersistenceError::UnsupportedQueryBackend {
            backend: QueryBackend::Search,
            criterion: "ByNode".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported query backend search for ByNode");

        let err = PersistenceError::PermissionDenied {
            permission: Permission::Delete,
            user: "alice".to_string(),
            target: "node-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Permission denied: alice may not delete node-1"
        );

        let err = PersistenceError::AllocatorExhaustion {
            sequence: "revision".to_string(),
            reason: "counter offline".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sequence revision exhausted: counter offline"
        );

        let err = PersistenceError::integrity("duplicate key 3");
        assert_eq!(err.to_string(), "Integrity violation: duplicate key 3");
    }

    /// Test classification helpers
    #[test]
    fn test_error_classification() {
        assert!(PersistenceError::Storage("timeout".into()).is_transient());
        assert!(!PersistenceError::integrity("x").is_transient());
        assert!(PersistenceError::integrity("x").is_integrity_violation());
        assert!(PersistenceError::PermissionDenied {
            permission: Permission::Read,
            user: "u".into(),
            target: "k".into(),
        }
        .is_permission_denied());
        assert!(PersistenceError::UnsupportedQueryBackend {
            backend: QueryBackend::Relational,
            criterion: "c".into(),
        }
        .is_unsupported_backend());
    }

    /// Test conversion from serde_json errors
    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PersistenceError = json_err.into();
        assert!(matches!(err, PersistenceError::Serialization(_)));
    }
}
