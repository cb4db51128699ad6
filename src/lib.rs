//! # feedback-learn - Correction Memory for Extracted Entities
//!
//! feedback-learn remembers the corrections a reviewer makes to
//! LLM-extracted entities (persons, workflows, insights) and uses them to
//! stop the same mistakes from coming back. Concrete corrections are
//! replayed exactly; corrections that recur across entities are
//! generalized into pattern rules that fix values never seen before.
//!
//! ## Core Concepts
//!
//! - **Correction**: a user-asserted fix of one extracted field value
//! - **PatternRule**: a generalized rule derived from two or more corroborating corrections
//! - **KnowledgeBase**: every correction and rule, loaded and saved as one explicit value
//! - **LearningSession**: load, apply, correct and persist for one analyzed document
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use feedback_learn::{
//!     CorrectionCommand, EntityKind, ExtractedEntities, ExtractedEntity,
//!     InMemoryKnowledgeStore, LearningConfig, LearningSession,
//! };
//!
//! let store = Arc::new(InMemoryKnowledgeStore::new());
//! let mut session = LearningSession::new(store, LearningConfig::default())?;
//!
//! let document = ExtractedEntities::new("mail-001").with(
//!     EntityKind::Person,
//!     ExtractedEntity::new("yamada").with_field("role", "営業部長"),
//! );
//!
//! session.begin()?;
//! let applied = session.apply(&document)?;
//! assert!(applied.warnings.is_empty());
//!
//! session.record(&CorrectionCommand::new(EntityKind::Person, "yamada", "role", "エンジニア"))?;
//! session.persist()?;
//! session.end()?;
//! # Ok::<(), feedback_learn::LearnError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod confidence;
pub mod config;
pub mod correction;
pub mod entity;
pub mod error;
pub mod normalize;
pub mod pattern;

// Knowledge and storage
pub mod knowledge;
pub mod storage;

// Learning pipeline
pub mod abstraction;
pub mod advisor;
pub mod matcher;
pub mod recorder;
pub mod report;
pub mod session;

// Re-export primary types at crate root for convenience
pub use confidence::ConfidenceScale;
pub use config::{LearningConfig, RetentionPolicy};
pub use correction::{Correction, CorrectionBuilder, CorrectionCommand, CorrectionId};
pub use entity::{EntityKind, ExtractedEntities, ExtractedEntity};
pub use error::{ConfigError, InvalidCorrection, LearnError, LearnResult, SessionError};
pub use knowledge::{KnowledgeBase, MergeSummary};
pub use pattern::{MatchMode, PatternId, PatternKind, PatternRule, Trigger};
pub use storage::{InMemoryKnowledgeStore, JsonFileStore, KnowledgeStore, StagedSave, StoreError};

// Pipeline re-exports
pub use abstraction::PatternAbstractor;
pub use advisor::{advise, verification_checklist, Advisory, AdvisoryReason};
pub use matcher::{apply, Applied, ApplyWarning, MatchBasis, MatchSource};
pub use recorder::{record, resolve_command};
pub use report::LearningReport;
pub use session::{LearningSession, SessionReport, SessionState};
