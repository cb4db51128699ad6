//! Rule matcher and applier.
//!
//! Applies concrete corrections and generalized rules to a freshly
//! extracted entity set. The knowledge base is only read.
//!
//! Matching order for each field value:
//! 1. An exact correction on (entity kind, entity key, field, value).
//!    The newest one wins and always beats any rule.
//! 2. The best matching pattern rule: highest confidence, then highest
//!    support, then most recently created.
//!
//! A rewrite the reviewer has reverted for this entity is not applied again.
//! Fields the analysis left out are filled from corrections recorded
//! against the missing field. A field without a match passes through
//! unchanged and produces no warning.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::correction::CorrectionId;
use crate::entity::{EntityKind, ExtractedEntities};
use crate::knowledge::KnowledgeBase;
use crate::pattern::{PatternId, PatternRule};

/// Whether a rewrite came from a concrete correction or a pattern rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    /// A concrete correction for this entity.
    Correction,
    /// A generalized pattern rule.
    Pattern,
}

impl fmt::Display for MatchBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correction => f.write_str("correction"),
            Self::Pattern => f.write_str("pattern"),
        }
    }
}

/// The knowledge that produced a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "basis", content = "rule_or_correction_id", rename_all = "snake_case")]
pub enum MatchSource {
    /// The correction that was replayed.
    Correction(CorrectionId),
    /// The rule that matched.
    Pattern(PatternId),
}

impl MatchSource {
    /// Whether this is a correction or a rule.
    #[must_use]
    pub const fn basis(&self) -> MatchBasis {
        match self {
            Self::Correction(_) => MatchBasis::Correction,
            Self::Pattern(_) => MatchBasis::Pattern,
        }
    }

    /// The rule id, when the rewrite came from a rule.
    #[must_use]
    pub const fn rule_id(&self) -> Option<PatternId> {
        match self {
            Self::Pattern(id) => Some(*id),
            Self::Correction(_) => None,
        }
    }
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correction(id) => write!(f, "correction {id}"),
            Self::Pattern(id) => write!(f, "pattern {id}"),
        }
    }
}

/// One rewritten field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyWarning {
    /// Kind of the rewritten entity.
    pub entity_kind: EntityKind,
    /// Key of the rewritten entity.
    pub entity_key: String,
    /// Rewritten field.
    pub field: String,
    /// Extracted value. Empty when the field was filled in.
    pub original_value: String,
    /// Value written in its place.
    pub applied_value: String,
    /// Knowledge that produced the rewrite.
    #[serde(flatten)]
    pub source: MatchSource,
}

impl ApplyWarning {
    /// Whether a correction or a rule produced the rewrite.
    #[must_use]
    pub const fn basis(&self) -> MatchBasis {
        self.source.basis()
    }
}

impl fmt::Display for ApplyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' {}: '{}' → '{}' ({})",
            self.entity_kind,
            self.entity_key,
            self.field,
            self.original_value,
            self.applied_value,
            self.source
        )
    }
}

/// Result of applying knowledge to an entity set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    /// The entity set with matched values rewritten.
    pub entities: ExtractedEntities,
    /// One record per rewritten value, in entity order.
    pub warnings: Vec<ApplyWarning>,
}

impl Applied {
    /// Rules that rewrote at least one value, without duplicates.
    #[must_use]
    pub fn matched_rules(&self) -> Vec<PatternId> {
        let mut ids: Vec<PatternId> = self
            .warnings
            .iter()
            .filter_map(|w| w.source.rule_id())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

fn rank(a: &PatternRule, b: &PatternRule) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then(a.support_count.cmp(&b.support_count))
        .then(a.created_at.cmp(&b.created_at))
        // Lower id wins the final tie.
        .then(b.id.cmp(&a.id))
}

/// Finds the rewrite for one field value, if any.
#[must_use]
pub fn best_match(
    knowledge: &KnowledgeBase,
    kind: EntityKind,
    key: &str,
    field: &str,
    value: &str,
) -> Option<(String, MatchSource)> {
    // A correction for this entity that turned `rewritten` back into `value`.
    let reverted = |rewritten: &str| {
        knowledge
            .latest_exact(kind, key, field, rewritten)
            .filter(|c| c.correct_value.trim() == value.trim())
    };

    if let Some(correction) = knowledge.latest_exact(kind, key, field, value) {
        let resolved = correction.correct_value.trim();
        let revert_is_newer = reverted(resolved).is_some_and(|r| r.timestamp >= correction.timestamp);
        if resolved != value.trim() && !revert_is_newer {
            return Some((resolved.to_string(), MatchSource::Correction(correction.id)));
        }
    }

    knowledge
        .rules_for(kind, field)
        .filter(|rule| rule.resolution.trim() != value.trim() && rule.matches_value(value))
        .filter(|rule| reverted(rule.resolution.trim()).is_none())
        .max_by(|a, b| rank(a, b))
        .map(|rule| (rule.resolution.trim().to_string(), MatchSource::Pattern(rule.id)))
}

/// Applies corrections and rules to an entity set.
///
/// Every field of every entity is matched once against its extracted value;
/// missing fields with a recorded correction are then filled in. Entity
/// keys are never rewritten.
#[must_use]
pub fn apply(entities: &ExtractedEntities, knowledge: &KnowledgeBase) -> Applied {
    let mut revised = entities.clone();
    let mut warnings = Vec::new();

    for kind in EntityKind::ALL {
        for entity in revised.of_kind_mut(kind) {
            for (field, value) in &mut entity.fields {
                let Some((applied_value, source)) =
                    best_match(knowledge, kind, &entity.key, field, value)
                else {
                    continue;
                };

                debug!(%kind, key = %entity.key, %field, from = %value, to = %applied_value, %source, "applied knowledge");
                warnings.push(ApplyWarning {
                    entity_kind: kind,
                    entity_key: entity.key.clone(),
                    field: field.clone(),
                    original_value: std::mem::replace(value, applied_value.clone()),
                    applied_value,
                    source,
                });
            }

            for (field, correction) in knowledge.latest_fills(kind, &entity.key) {
                if entity.fields.contains_key(field) {
                    continue;
                }
                let applied_value = correction.correct_value.trim().to_string();
                debug!(%kind, key = %entity.key, %field, to = %applied_value, "filled missing field");
                entity.fields.insert(field.to_string(), applied_value.clone());
                warnings.push(ApplyWarning {
                    entity_kind: kind,
                    entity_key: entity.key.clone(),
                    field: field.to_string(),
                    original_value: String::new(),
                    applied_value,
                    source: MatchSource::Correction(correction.id),
                });
            }
        }
    }

    Applied {
        entities: revised,
        warnings,
    }
}
