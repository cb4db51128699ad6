//! Error types for the learning engine.
//!
//! All errors are strongly typed using thiserror. Errors local to one
//! record (a single correction) are surfaced as [`InvalidCorrection`] and
//! never abort a batch; store-level failures travel as [`StoreError`] up to
//! the session boundary.

use thiserror::Error;

use crate::entity::EntityKind;
use crate::session::SessionState;

pub use crate::storage::StoreError;

/// A correction rejected at the recorder boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidCorrection {
    /// The entity kind text is not recognized.
    #[error("Unknown entity kind '{value}' (expected person, workflow or insight)")]
    UnknownEntityKind {
        /// The text as supplied.
        value: String,
    },

    /// The entity key is missing or blank.
    #[error("Entity key cannot be empty")]
    EmptyEntityKey,

    /// The field name is missing or blank.
    #[error("Corrected field name cannot be empty")]
    EmptyField,

    /// The correct value is missing or blank.
    #[error("Correct value cannot be empty")]
    EmptyCorrectValue,

    /// The correct value equals the wrong value.
    #[error("No-op correction: field '{field}' already holds '{value}'")]
    NoOp {
        /// Corrected field.
        field: String,
        /// Value the field already holds.
        value: String,
    },

    /// The command names an entity absent from the reviewed document.
    #[error("No {kind} with key '{key}' in the current document")]
    EntityNotFound {
        /// Requested entity kind.
        kind: EntityKind,
        /// Requested entity key.
        key: String,
    },
}

/// Errors raised by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The operation is not allowed in the current state.
    #[error("Cannot {operation} while the session is {state}")]
    InvalidTransition {
        /// State the session was in.
        state: SessionState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// The operation needs an applied document.
    #[error("No document has been applied in this session")]
    NoAppliedDocument,
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A setting is out of range.
    #[error("Invalid configuration for '{field}': {reason}")]
    Invalid {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration file cannot be read or parsed.
    #[error("Failed to read configuration from {path}: {reason}")]
    Unreadable {
        /// Configuration file path.
        path: String,
        /// Underlying failure.
        reason: String,
    },
}

/// Top-level error type for the learning engine.
#[derive(Debug, Error)]
pub enum LearnError {
    /// A correction was rejected.
    #[error("Invalid correction: {0}")]
    InvalidCorrection(#[from] InvalidCorrection),

    /// The store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The session was used out of order.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An internal invariant was broken.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },
}

impl LearnError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a rejected correction.
    #[must_use]
    pub const fn is_invalid_correction(&self) -> bool {
        matches!(self, Self::InvalidCorrection(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is a session state error.
    #[must_use]
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Only write failures qualify: the in-memory state is retained and a
    /// later flush can still reach the disk.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => matches!(e, StoreError::Persistence { .. }),
            _ => false,
        }
    }
}

/// Result type alias for learning engine operations.
pub type LearnResult<T> = Result<T, LearnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_correction_noop_message() {
        let err = InvalidCorrection::NoOp {
            field: "role".to_string(),
            value: "エンジニア".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("No-op"));
        assert!(msg.contains("role"));
    }

    #[test]
    fn test_unknown_kind_message() {
        let err = InvalidCorrection::UnknownEntityKind {
            value: "robot".to_string(),
        };
        assert!(err.to_string().contains("robot"));
    }

    #[test]
    fn test_entity_not_found_message() {
        let err = InvalidCorrection::EntityNotFound {
            kind: EntityKind::Workflow,
            key: "月次請求".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("workflow"));
        assert!(msg.contains("月次請求"));
    }

    #[test]
    fn test_session_transition_message() {
        let err = SessionError::InvalidTransition {
            state: SessionState::Idle,
            operation: "apply",
        };
        let msg = err.to_string();
        assert!(msg.contains("apply"));
        assert!(msg.contains("idle"));
    }

    #[test]
    fn test_learn_error_from_invalid_correction() {
        let err: LearnError = InvalidCorrection::EmptyCorrectValue.into();
        assert!(err.is_invalid_correction());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persistence_error_is_retryable() {
        let err: LearnError = StoreError::Persistence {
            path: "kb.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        }
        .into();
        assert!(err.is_store());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_corrupt_store_is_not_retryable() {
        let err: LearnError = StoreError::Corrupt {
            path: "kb.json".into(),
            reason: "expected value at line 1".to_string(),
        }
        .into();
        assert!(err.is_store());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error() {
        let err = LearnError::internal("unexpected state");
        assert!(!err.is_session());
        assert!(err.to_string().contains("unexpected state"));
    }
}
