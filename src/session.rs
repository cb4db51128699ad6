//! Learning session controller.
//!
//! One session is one pass over one analyzed document:
//!
//! ```text
//! Idle ──begin──▶ Loaded ──apply──▶ Applied ──record──▶ Corrected
//!   ▲                                                      │
//!   └────────end──────── Persisted ◀──────persist──────────┘
//! ```
//!
//! The session exclusively owns the in-memory [`KnowledgeBase`] between
//! `begin` and `end`. The store is written only by `persist`, so an
//! abandoned session leaves the persisted state untouched. A failed
//! `persist` keeps everything in memory and can be retried.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::abstraction::PatternAbstractor;
use crate::advisor::{advise, Advisory};
use crate::config::LearningConfig;
use crate::correction::{Correction, CorrectionCommand, CorrectionId};
use crate::entity::ExtractedEntities;
use crate::error::{LearnError, LearnResult, SessionError};
use crate::knowledge::{KnowledgeBase, MergeSummary};
use crate::matcher::{apply, Applied};
use crate::pattern::PatternId;
use crate::recorder::{record, resolve_command};
use crate::storage::{KnowledgeStore, StoreError};

/// Lifecycle state of a [`LearningSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No knowledge base in memory.
    Idle,
    /// Knowledge base loaded.
    Loaded,
    /// Knowledge applied to the current document.
    Applied,
    /// Unsaved corrections or rule changes in memory.
    Corrected,
    /// Everything saved.
    Persisted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loaded => "loaded",
            Self::Applied => "applied",
            Self::Corrected => "corrected",
            Self::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful `persist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    /// Ordinal of the persisted session.
    pub session: u64,
    /// Corrections recorded in this session.
    pub corrections_recorded: usize,
    /// Values rewritten by `apply`.
    pub values_rewritten: usize,
    /// Rule changes made by the final abstraction pass.
    #[serde(skip)]
    pub merge: MergeSummary,
}

#[derive(Debug)]
struct Document {
    original: ExtractedEntities,
    revised: ExtractedEntities,
}

/// Orchestrates load, apply, correct and persist for one document.
pub struct LearningSession {
    store: Arc<dyn KnowledgeStore>,
    config: LearningConfig,
    abstractor: PatternAbstractor,
    state: SessionState,
    knowledge: Option<KnowledgeBase>,
    document: Option<Document>,
    corrections_recorded: usize,
    values_rewritten: usize,
}

impl fmt::Debug for LearningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningSession")
            .field("store", &self.store.location())
            .field("state", &self.state)
            .field("corrections_recorded", &self.corrections_recorded)
            .finish_non_exhaustive()
    }
}

impl LearningSession {
    /// Creates an idle session over a store.
    ///
    /// # Errors
    ///
    /// Returns `LearnError::Config` if the configuration is invalid.
    pub fn new(store: Arc<dyn KnowledgeStore>, config: LearningConfig) -> LearnResult<Self> {
        let config = config.validate()?;
        Ok(Self {
            store,
            abstractor: PatternAbstractor::new(&config),
            config,
            state: SessionState::Idle,
            knowledge: None,
            document: None,
            corrections_recorded: 0,
            values_rewritten: 0,
        })
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The in-memory knowledge base, while a session is open.
    #[must_use]
    pub fn knowledge(&self) -> Option<&KnowledgeBase> {
        self.knowledge.as_ref()
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    fn expect_state(&self, allowed: &[SessionState], operation: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                state: self.state,
                operation,
            })
        }
    }

    fn knowledge_mut(&mut self) -> LearnResult<&mut KnowledgeBase> {
        self.knowledge
            .as_mut()
            .ok_or_else(|| LearnError::internal("session has no knowledge base in memory"))
    }

    /// Loads the knowledge base (`Idle → Loaded`).
    ///
    /// A corrupt store is quarantined and replaced by an empty knowledge
    /// base; the session continues with a warning.
    ///
    /// # Errors
    ///
    /// - `Session`: the session is not idle
    /// - `Store`: the store cannot be read, or a corrupt store cannot be quarantined
    pub fn begin(&mut self) -> LearnResult<()> {
        self.expect_state(&[SessionState::Idle], "begin")?;

        let knowledge = match self.store.load() {
            Ok(knowledge) => knowledge,
            Err(StoreError::Corrupt { path, reason }) => {
                let moved = self.store.quarantine()?;
                warn!(
                    path = %path.display(),
                    %reason,
                    quarantined = ?moved,
                    "knowledge base is corrupt, starting from an empty one"
                );
                KnowledgeBase::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            store = %self.store.location(),
            corrections = knowledge.corrections().len(),
            rules = knowledge.rules().len(),
            unreadable = knowledge.unreadable_records(),
            session = knowledge.current_session(),
            "learning session started"
        );
        self.knowledge = Some(knowledge);
        self.document = None;
        self.corrections_recorded = 0;
        self.values_rewritten = 0;
        self.state = SessionState::Loaded;
        Ok(())
    }

    /// Applies learned knowledge to a freshly extracted document
    /// (`Loaded → Applied`).
    ///
    /// Rules that rewrote a value are marked as matched in this session.
    ///
    /// # Errors
    ///
    /// Returns `Session` unless the session is loaded.
    pub fn apply(&mut self, entities: &ExtractedEntities) -> LearnResult<Applied> {
        self.expect_state(&[SessionState::Loaded], "apply")?;

        let knowledge = self.knowledge_mut()?;
        let applied = apply(entities, knowledge);
        let session = knowledge.current_session();
        knowledge.mark_matched(&applied.matched_rules(), session);

        info!(
            document = %entities.document_id,
            entities = entities.len(),
            rewritten = applied.warnings.len(),
            "applied knowledge"
        );
        self.values_rewritten = applied.warnings.len();
        self.document = Some(Document {
            original: entities.clone(),
            revised: applied.entities.clone(),
        });
        self.state = SessionState::Applied;
        Ok(applied)
    }

    /// Advisories for the applied document.
    ///
    /// # Errors
    ///
    /// Returns `Session` if no document has been applied.
    pub fn advisories(&self) -> LearnResult<Vec<Advisory>> {
        self.expect_state(&[SessionState::Applied, SessionState::Corrected], "advise")?;
        let (Some(document), Some(knowledge)) = (&self.document, &self.knowledge) else {
            return Err(SessionError::NoAppliedDocument.into());
        };
        Ok(advise(&document.revised, knowledge, &self.config))
    }

    /// Records a review command against the applied document
    /// (`Applied | Corrected → Corrected`).
    ///
    /// The wrong value is the value originally extracted, before any
    /// knowledge was applied. Restoring an extracted value that `apply`
    /// rewrote records the rewrite as wrong, so it is not repeated for this
    /// entity. A rejected command leaves the session state unchanged.
    ///
    /// # Errors
    ///
    /// - `Session`: no document has been applied
    /// - `InvalidCorrection`: unknown entity, no-op, or empty value
    pub fn record(&mut self, command: &CorrectionCommand) -> LearnResult<CorrectionId> {
        self.expect_state(&[SessionState::Applied, SessionState::Corrected], "record")?;
        let document = self.document.as_ref().ok_or(SessionError::NoAppliedDocument)?;
        let correction = resolve_command(command, &document.original, &document.revised)?;
        self.record_correction(correction)
    }

    /// Records a fully specified correction
    /// (`Loaded | Applied | Corrected → Corrected`).
    ///
    /// Unlike [`record`](Self::record) this does not need an applied
    /// document, which suits batch imports.
    ///
    /// # Errors
    ///
    /// - `Session`: the session is not open
    /// - `InvalidCorrection`: the correction fails validation
    pub fn record_correction(&mut self, correction: Correction) -> LearnResult<CorrectionId> {
        self.expect_state(
            &[SessionState::Loaded, SessionState::Applied, SessionState::Corrected],
            "record",
        )?;
        let id = record(self.knowledge_mut()?, correction)?;
        self.corrections_recorded += 1;
        self.state = SessionState::Corrected;
        Ok(id)
    }

    /// Drops idle superseded rules per the configured retention policy.
    ///
    /// The change is only in memory until the next `persist`.
    ///
    /// # Errors
    ///
    /// Returns `Session` if the session is not open.
    pub fn prune_idle_rules(&mut self) -> LearnResult<Vec<PatternId>> {
        self.expect_state(
            &[SessionState::Loaded, SessionState::Applied, SessionState::Corrected],
            "prune",
        )?;
        let policy = self.config.retention;
        let removed = self.knowledge_mut()?.prune_idle_rules(&policy);
        if !removed.is_empty() {
            self.state = SessionState::Corrected;
        }
        Ok(removed)
    }

    /// Re-runs abstraction and saves (`Loaded | Applied | Corrected → Persisted`).
    ///
    /// On failure the session keeps its state and every in-memory
    /// correction; calling `persist` again retries the save.
    ///
    /// # Errors
    ///
    /// - `Session`: the session is not open
    /// - `Store`: the save failed (retryable)
    pub fn persist(&mut self) -> LearnResult<SessionReport> {
        self.expect_state(
            &[SessionState::Loaded, SessionState::Applied, SessionState::Corrected],
            "persist",
        )?;

        let abstractor = self.abstractor;
        let knowledge = self.knowledge_mut()?;
        let session = knowledge.current_session();
        let merge = abstractor.run(knowledge, session);

        let mut next = knowledge.clone();
        next.complete_session();

        if let Err(e) = self.store.save(&next) {
            error!(
                store = %self.store.location(),
                error = %e,
                corrections_recorded = self.corrections_recorded,
                "failed to persist learning, keeping it in memory for retry"
            );
            return Err(e.into());
        }

        info!(
            session,
            added = merge.added,
            updated = merge.updated,
            superseded = merge.superseded,
            corrections_recorded = self.corrections_recorded,
            "learning persisted"
        );
        self.knowledge = Some(next);
        self.state = SessionState::Persisted;
        Ok(SessionReport {
            session,
            corrections_recorded: self.corrections_recorded,
            values_rewritten: self.values_rewritten,
            merge,
        })
    }

    /// Ends a persisted session and discards the in-memory state
    /// (`Persisted → Idle`).
    ///
    /// # Errors
    ///
    /// Returns `Session` unless the session is persisted.
    pub fn end(&mut self) -> LearnResult<()> {
        self.expect_state(&[SessionState::Persisted], "end")?;
        self.reset();
        Ok(())
    }

    /// Discards the session without saving, from any state.
    ///
    /// Returns the number of unsaved corrections that were dropped.
    pub fn abandon(&mut self) -> usize {
        let dropped = if self.state == SessionState::Persisted {
            0
        } else {
            self.corrections_recorded
        };
        if dropped > 0 {
            warn!(dropped, "abandoning session with unsaved corrections");
        }
        self.reset();
        dropped
    }

    fn reset(&mut self) {
        self.knowledge = None;
        self.document = None;
        self.corrections_recorded = 0;
        self.values_rewritten = 0;
        self.state = SessionState::Idle;
    }
}
