//! Correction records: concrete, user-asserted fixes to one extracted field.
//!
//! Corrections are immutable once recorded. A later fix for the same
//! entity and field is a new record, so the full history stays available
//! for abstraction.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::InvalidCorrection;
use crate::normalize::normalize_key;
use crate::pattern::PatternKind;

/// Unique identifier for a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrectionId(Uuid);

impl CorrectionId {
    /// Creates a new random correction ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a correction ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CorrectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A concrete fact overriding one extracted value.
///
/// # Examples
///
/// ```
/// use feedback_learn::{Correction, EntityKind};
///
/// let correction = Correction::builder()
///     .entity(EntityKind::Person, "yamada")
///     .field("role")
///     .wrong_value("営業部長")
///     .correct_value("エンジニア")
///     .source_document("mail-2024-03-01")
///     .build()
///     .unwrap();
///
/// assert_eq!(correction.field, "role");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    /// Unique identifier.
    pub id: CorrectionId,
    /// Kind of the corrected entity.
    pub entity_kind: EntityKind,
    /// Entity identifier as originally produced in the source document.
    pub entity_key: String,
    /// Corrected field.
    pub field: String,
    /// The value the analysis produced. Empty when the field was missing.
    #[serde(default)]
    pub wrong_value: String,
    /// The value the reviewer asserted.
    pub correct_value: String,
    /// Document or analysis run that produced the error.
    #[serde(default)]
    pub source_document_id: String,
    /// When the correction was recorded.
    pub timestamp: DateTime<Utc>,
    /// Restores an extracted value that learned knowledge had rewritten.
    ///
    /// Such a correction only suppresses that rewrite for its entity; it is
    /// not evidence for a new pattern.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reverts_rewrite: bool,
}

impl Correction {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> CorrectionBuilder {
        CorrectionBuilder::new()
    }

    /// Checks the recorder invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCorrection` when the key, field or correct value is
    /// empty, or when the correction would not change anything.
    pub fn validate(&self) -> Result<(), InvalidCorrection> {
        if self.entity_key.trim().is_empty() {
            return Err(InvalidCorrection::EmptyEntityKey);
        }
        if self.field.trim().is_empty() {
            return Err(InvalidCorrection::EmptyField);
        }
        if self.correct_value.trim().is_empty() {
            return Err(InvalidCorrection::EmptyCorrectValue);
        }
        if self.wrong_value.trim() == self.correct_value.trim() {
            return Err(InvalidCorrection::NoOp {
                field: self.field.clone(),
                value: self.correct_value.clone(),
            });
        }
        Ok(())
    }

    /// The pattern kind this correction's field generalizes into.
    #[must_use]
    pub fn pattern_kind(&self) -> PatternKind {
        PatternKind::for_field(&self.field)
    }

    /// Trigger derived from the wrong value.
    #[must_use]
    pub fn trigger_text(&self) -> String {
        self.pattern_kind().normalize(&self.wrong_value)
    }

    /// The dedupe unit used when counting support.
    ///
    /// Recording the same fix for the same entity repeatedly (for instance
    /// from several documents) yields the same key.
    #[must_use]
    pub fn support_key(&self) -> SupportKey {
        SupportKey {
            entity_kind: self.entity_kind,
            entity_key: normalize_key(&self.entity_key),
            field: self.field.trim().to_string(),
            trigger: self.trigger_text(),
            correct_value: self.correct_value.trim().to_string(),
        }
    }

    /// Returns true if this correction applies to the given entity field value.
    #[must_use]
    pub fn matches_exact(&self, kind: EntityKind, key: &str, field: &str, value: &str) -> bool {
        self.entity_kind == kind
            && self.entity_key.trim() == key.trim()
            && self.field.trim() == field.trim()
            && self.wrong_value.trim() == value.trim()
    }
}

/// Distinct unit of support for abstraction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SupportKey {
    /// Kind of the corrected entity.
    pub entity_kind: EntityKind,
    /// Normalized entity key.
    pub entity_key: String,
    /// Trimmed field name.
    pub field: String,
    /// Trigger text derived from the wrong value.
    pub trigger: String,
    /// Trimmed correct value.
    pub correct_value: String,
}

/// Builder for creating Correction instances.
#[derive(Debug, Default)]
pub struct CorrectionBuilder {
    id: Option<CorrectionId>,
    entity_kind: Option<EntityKind>,
    entity_key: Option<String>,
    field: Option<String>,
    wrong_value: Option<String>,
    correct_value: Option<String>,
    source_document_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    reverts_rewrite: bool,
}

impl CorrectionBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correction ID (generated if not set).
    #[must_use]
    pub fn id(mut self, id: CorrectionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the corrected entity.
    #[must_use]
    pub fn entity(mut self, kind: EntityKind, key: impl Into<String>) -> Self {
        self.entity_kind = Some(kind);
        self.entity_key = Some(key.into());
        self
    }

    /// Sets the corrected field.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Sets the value the analysis produced (empty if not set).
    #[must_use]
    pub fn wrong_value(mut self, value: impl Into<String>) -> Self {
        self.wrong_value = Some(value.into());
        self
    }

    /// Sets the asserted value.
    #[must_use]
    pub fn correct_value(mut self, value: impl Into<String>) -> Self {
        self.correct_value = Some(value.into());
        self
    }

    /// Sets the document the error came from.
    #[must_use]
    pub fn source_document(mut self, document_id: impl Into<String>) -> Self {
        self.source_document_id = Some(document_id.into());
        self
    }

    /// Sets the creation time (defaults to now).
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Marks the correction as restoring a value that knowledge rewrote.
    #[must_use]
    pub fn reverts_rewrite(mut self, reverts: bool) -> Self {
        self.reverts_rewrite = reverts;
        self
    }

    /// Builds and validates the Correction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCorrection` if the entity, field or correct value is
    /// missing or empty, or if the correction is a no-op.
    pub fn build(self) -> Result<Correction, InvalidCorrection> {
        let (entity_kind, entity_key) = match (self.entity_kind, self.entity_key) {
            (Some(kind), Some(key)) => (kind, key),
            _ => return Err(InvalidCorrection::EmptyEntityKey),
        };

        let correction = Correction {
            id: self.id.unwrap_or_default(),
            entity_kind,
            entity_key,
            field: self.field.ok_or(InvalidCorrection::EmptyField)?,
            wrong_value: self.wrong_value.unwrap_or_default(),
            correct_value: self.correct_value.ok_or(InvalidCorrection::EmptyCorrectValue)?,
            source_document_id: self.source_document_id.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            reverts_rewrite: self.reverts_rewrite,
        };

        correction.validate()?;
        Ok(correction)
    }
}

/// A correction as supplied by an interactive review surface.
///
/// The wrong value is not part of the command: the session resolves it from
/// the document currently under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionCommand {
    /// Kind of the corrected entity.
    pub entity_kind: EntityKind,
    /// Key of the entity in the reviewed document.
    pub entity_key: String,
    /// Corrected field.
    pub field: String,
    /// The value the reviewer asserts.
    pub correct_value: String,
}

impl CorrectionCommand {
    /// Creates a command.
    #[must_use]
    pub fn new(
        entity_kind: EntityKind,
        entity_key: impl Into<String>,
        field: impl Into<String>,
        correct_value: impl Into<String>,
    ) -> Self {
        Self {
            entity_kind,
            entity_key: entity_key.into(),
            field: field.into(),
            correct_value: correct_value.into(),
        }
    }

    /// Parses a command whose entity kind arrives as text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCorrection::UnknownEntityKind` for an unrecognized kind.
    pub fn parse(
        entity_kind: &str,
        entity_key: impl Into<String>,
        field: impl Into<String>,
        correct_value: impl Into<String>,
    ) -> Result<Self, InvalidCorrection> {
        Ok(Self::new(entity_kind.parse()?, entity_key, field, correct_value))
    }
}
