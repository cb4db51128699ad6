//! Pre-emptive advisories.
//!
//! Advisories flag values that look like repeat mistakes but are not yet
//! backed by enough evidence to rewrite. Unlike [`apply`](crate::apply)
//! they never change an entity; they only ask a reviewer to take a look.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::config::LearningConfig;
use crate::correction::{Correction, CorrectionId, SupportKey};
use crate::entity::{EntityKind, ExtractedEntities};
use crate::knowledge::KnowledgeBase;
use crate::normalize::normalize_key;
use crate::pattern::{PatternKind, Trigger};

/// Longest name, in characters, still treated as a possible short form.
pub const SHORT_NAME_MAX_CHARS: usize = 3;

/// Why a value deserves a second look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdvisoryReason {
    /// The same wrong value was corrected once for another entity.
    UncorroboratedCorrection {
        /// The earlier correction.
        correction_id: CorrectionId,
    },
    /// A very short name while name aliases have been learned before.
    ShortFormName,
}

/// A suggestion for the reviewer. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advisory {
    /// Kind of the flagged entity.
    pub entity_kind: EntityKind,
    /// Key of the flagged entity.
    pub entity_key: String,
    /// Flagged field.
    pub field: String,
    /// Value as it stands.
    pub value: String,
    /// Why it was flagged.
    #[serde(flatten)]
    pub reason: AdvisoryReason,
    /// Value the earlier correction used, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reason, &self.suggestion) {
            (AdvisoryReason::ShortFormName, _) => write!(
                f,
                "{} '{}': '{}' may be a short form of the full name",
                self.entity_kind, self.entity_key, self.value
            ),
            (AdvisoryReason::UncorroboratedCorrection { .. }, Some(suggestion)) => write!(
                f,
                "{} '{}' {}: '{}' was corrected to '{}' elsewhere",
                self.entity_kind, self.entity_key, self.field, self.value, suggestion
            ),
            (AdvisoryReason::UncorroboratedCorrection { .. }, None) => write!(
                f,
                "{} '{}' {}: '{}' was corrected elsewhere",
                self.entity_kind, self.entity_key, self.field, self.value
            ),
        }
    }
}

/// A recorded correction with its support unit and corroboration.
struct Earlier<'a> {
    correction: &'a Correction,
    key: SupportKey,
    /// Distinct entities fixed with the same trigger and resolution.
    support: usize,
}

type Resolution<'k> = (EntityKind, &'k str, &'k str, &'k str);

fn resolution(key: &SupportKey) -> Resolution<'_> {
    (
        key.entity_kind,
        key.field.as_str(),
        key.trigger.as_str(),
        key.correct_value.as_str(),
    )
}

/// Keys every correction once. Reverted rewrites are not evidence.
fn history(knowledge: &KnowledgeBase) -> Vec<Earlier<'_>> {
    let keyed: Vec<(&Correction, SupportKey)> = knowledge
        .corrections()
        .iter()
        .filter(|c| !c.reverts_rewrite)
        .map(|c| (c, c.support_key()))
        .collect();

    let supports: Vec<usize> = {
        let mut entities: HashMap<Resolution<'_>, HashSet<&str>> = HashMap::new();
        for (_, key) in &keyed {
            entities.entry(resolution(key)).or_default().insert(key.entity_key.as_str());
        }
        keyed
            .iter()
            .map(|(_, key)| entities.get(&resolution(key)).map_or(0, HashSet::len))
            .collect()
    };

    keyed
        .into_iter()
        .zip(supports)
        .map(|((correction, key), support)| Earlier {
            correction,
            key,
            support,
        })
        .collect()
}

fn uncorroborated(
    knowledge: &KnowledgeBase,
    history: &[Earlier<'_>],
    threshold: usize,
    (kind, key, field, value): (EntityKind, &str, &str, &str),
) -> Option<Advisory> {
    if knowledge.latest_exact(kind, key, field, value).is_some()
        || knowledge.rules_for(kind, field).any(|r| r.matches_value(value))
    {
        return None;
    }

    let pattern_kind = PatternKind::for_field(field);
    let normalized = pattern_kind.normalize(value);
    let entity = normalize_key(key);

    let earlier = history
        .iter()
        .filter(|e| {
            e.key.entity_kind == kind
                && e.key.field == field.trim()
                && e.key.entity_key != entity
                && e.key.correct_value != value.trim()
                && e.support < threshold
                && Trigger::new(e.key.trigger.as_str(), pattern_kind.match_mode()).matches(&normalized)
        })
        .max_by_key(|e| e.correction.timestamp)?;

    Some(Advisory {
        entity_kind: kind,
        entity_key: key.to_string(),
        field: field.to_string(),
        value: value.to_string(),
        reason: AdvisoryReason::UncorroboratedCorrection {
            correction_id: earlier.correction.id,
        },
        suggestion: Some(earlier.key.correct_value.clone()),
    })
}

fn short_form_name(knowledge: &KnowledgeBase, field: &str, value: &str) -> bool {
    let value = value.trim();
    PatternKind::for_field(field) == PatternKind::NameAlias
        && !value.is_empty()
        && value.chars().count() <= SHORT_NAME_MAX_CHARS
        && !value.chars().any(char::is_whitespace)
        && knowledge
            .rules()
            .iter()
            .any(|r| r.pattern_kind == PatternKind::NameAlias)
}

/// Flags values worth confirming before they are trusted.
///
/// Read-only: neither the entities nor the knowledge base change.
#[must_use]
pub fn advise(
    entities: &ExtractedEntities,
    knowledge: &KnowledgeBase,
    config: &LearningConfig,
) -> Vec<Advisory> {
    let earlier = history(knowledge);
    let threshold = usize::try_from(config.support_threshold).unwrap_or(usize::MAX);
    let mut advisories = Vec::new();

    for (kind, entity) in entities.iter() {
        for (field, value) in &entity.fields {
            let target = (kind, entity.key.as_str(), field.as_str(), value.as_str());
            if let Some(advisory) = uncorroborated(knowledge, &earlier, threshold, target) {
                advisories.push(advisory);
            } else if short_form_name(knowledge, field, value)
                && !knowledge.rules_for(kind, field).any(|r| r.matches_value(value))
            {
                advisories.push(Advisory {
                    entity_kind: kind,
                    entity_key: entity.key.clone(),
                    field: field.clone(),
                    value: value.clone(),
                    reason: AdvisoryReason::ShortFormName,
                    suggestion: None,
                });
            }
        }
    }

    advisories
}

/// Groups advisories into a human checklist.
///
/// Empty when there is nothing to confirm.
#[must_use]
pub fn verification_checklist(advisories: &[Advisory]) -> Vec<String> {
    let (names, values): (Vec<&Advisory>, Vec<&Advisory>) = advisories
        .iter()
        .partition(|a| a.reason == AdvisoryReason::ShortFormName);

    let mut lines = Vec::new();
    if !names.is_empty() {
        lines.push("Confirm the full names of:".to_string());
        lines.extend(names.iter().map(|a| format!("  - {} ({})", a.value, a.entity_key)));
    }
    if !values.is_empty() {
        lines.push("Confirm these values:".to_string());
        lines.extend(values.iter().map(|a| format!("  - {a}")));
    }
    lines
}
