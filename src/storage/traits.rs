//! Abstract storage trait for the knowledge base.
//!
//! The store owns on-disk durability and is the only component that writes
//! the persisted form. Everything above it works on an in-memory
//! [`KnowledgeBase`] value.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::knowledge::KnowledgeBase;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted document cannot be parsed.
    #[error("Knowledge base at {} is corrupt: {reason}", .path.display())]
    Corrupt {
        /// Document path.
        path: PathBuf,
        /// Parse failure.
        reason: String,
    },

    /// The persisted document was written by a newer schema.
    #[error("Knowledge base at {} has unsupported schema version {found} (supported: {supported})", .path.display())]
    UnsupportedVersion {
        /// Document path.
        path: PathBuf,
        /// Version found in the document.
        found: u64,
        /// Newest version this build reads.
        supported: u64,
    },

    /// The persisted document exists but cannot be read.
    #[error("Failed to read knowledge base at {}: {source}", .path.display())]
    Unreadable {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Writing the knowledge base failed. The previous content is intact.
    #[error("Failed to persist knowledge base to {}: {source}", .path.display())]
    Persistence {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if the stored document could not be understood.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Storage trait for the knowledge base.
///
/// # Safety Considerations
/// - `save` must replace the persisted state atomically: a reader sees
///   either the previous complete document or the new one
/// - A failed `save` must leave the previous persisted state untouched
pub trait KnowledgeStore: Send + Sync {
    /// Loads the persisted knowledge base.
    ///
    /// Creates an empty, initialized store when none exists yet.
    ///
    /// # Errors
    /// - `Corrupt`: the persisted form cannot be parsed
    /// - `Unreadable`: the backing location cannot be accessed
    fn load(&self) -> Result<KnowledgeBase, StoreError>;

    /// Atomically replaces the persisted knowledge base.
    ///
    /// # Errors
    /// - `Persistence`: the write failed; the previous state is intact
    fn save(&self, knowledge: &KnowledgeBase) -> Result<(), StoreError>;

    /// Moves an unreadable persisted document out of the way.
    ///
    /// Returns where it was moved, or `None` when the backend has nothing
    /// to quarantine.
    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }

    /// Short human-readable description of where the store lives.
    fn location(&self) -> String;
}
