//! Generalized pattern rules.
//!
//! A pattern rule says "when this field's value looks like the trigger,
//! the value is probably the resolution". Rules are derived by the
//! abstractor from two or more corroborating corrections and are never
//! edited by hand.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correction::CorrectionId;
use crate::entity::EntityKind;
use crate::normalize::{normalize_name, normalize_value};

/// Deterministic identifier for a pattern rule.
///
/// Derived from the rule's shape, so re-running abstraction over the same
/// history reproduces the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(Uuid);

impl PatternId {
    /// Derives the id of a rule from its identifying parts.
    #[must_use]
    pub fn derive(
        entity_kind: EntityKind,
        field: &str,
        kind: PatternKind,
        trigger: &str,
        resolution: &str,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [entity_kind.as_str(), field, kind.as_str(), trigger, resolution] {
            hasher.update(part.as_bytes());
            // Separator keeps ("ab", "c") and ("a", "bc") apart.
            hasher.update(&[0u8]);
        }
        let hash = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..16]);
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of mistake a rule generalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// A short or informal name that maps to a full name.
    NameAlias,
    /// A role that was systematically described too low (or wrongly).
    RoleUnderestimate,
    /// An organization or department attributed to the wrong party.
    OrganizationMisattribution,
    /// Any other field.
    Custom,
}

impl PatternKind {
    /// Classifies a field name.
    #[must_use]
    pub fn for_field(field: &str) -> Self {
        match field.trim().to_ascii_lowercase().as_str() {
            "name" | "full_name" | "display_name" => Self::NameAlias,
            "role" | "title" | "position" => Self::RoleUnderestimate,
            "organization" | "department" | "company" | "affiliation" => {
                Self::OrganizationMisattribution
            }
            _ => Self::Custom,
        }
    }

    /// Returns the snake_case name used in persisted state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NameAlias => "name_alias",
            Self::RoleUnderestimate => "role_underestimate",
            Self::OrganizationMisattribution => "organization_misattribution",
            Self::Custom => "custom",
        }
    }

    /// How triggers of this kind are compared with field values.
    #[must_use]
    pub const fn match_mode(&self) -> MatchMode {
        match self {
            Self::OrganizationMisattribution => MatchMode::Contains,
            Self::NameAlias | Self::RoleUnderestimate | Self::Custom => MatchMode::Equals,
        }
    }

    /// Normalizes a raw value into this kind's comparison form.
    #[must_use]
    pub fn normalize(&self, value: &str) -> String {
        match self {
            Self::NameAlias => normalize_name(value),
            _ => normalize_value(value),
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison between a normalized value and a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Normalized value equals the trigger.
    Equals,
    /// Normalized value contains the trigger.
    Contains,
}

/// The matchable condition of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    /// Normalized text extracted from the corrected wrong values.
    pub text: String,
    /// How the text is compared.
    pub mode: MatchMode,
}

impl Trigger {
    /// Creates a trigger from already-normalized text.
    #[must_use]
    pub fn new(text: impl Into<String>, mode: MatchMode) -> Self {
        Self {
            text: text.into(),
            mode,
        }
    }

    /// Tests an already-normalized value.
    #[must_use]
    pub fn matches(&self, normalized: &str) -> bool {
        if self.text.is_empty() || normalized.is_empty() {
            return false;
        }
        match self.mode {
            MatchMode::Equals => normalized == self.text,
            MatchMode::Contains => normalized.contains(self.text.as_str()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            MatchMode::Equals => write!(f, "= {}", self.text),
            MatchMode::Contains => write!(f, "~ {}", self.text),
        }
    }
}

/// A generalized, reusable rule derived from corroborating corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    /// Identifier derived from the rule's identity.
    pub id: PatternId,
    /// Category of mistake the rule corrects.
    pub pattern_kind: PatternKind,
    /// Entity kind the rule applies to.
    pub entity_kind: EntityKind,
    /// Field the rule applies to.
    pub field: String,
    /// Condition on the extracted value.
    pub trigger: Trigger,
    /// Replacement value applied when the trigger matches.
    pub resolution: String,
    /// Distinct corroborating corrections.
    pub support_count: u32,
    /// Confidence in `[0.0, 1.0]`, derived from support.
    pub confidence: f32,
    /// Corrections that produced this rule, in abstraction order.
    pub created_from: Vec<CorrectionId>,
    /// Timestamp of the newest supporting correction.
    pub created_at: DateTime<Utc>,

    /// The current rule for the same trigger, once this one stops being produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<PatternId>,

    /// Ordinal of the session in which the rule first entered the knowledge base.
    #[serde(default)]
    pub first_seen_session: u64,

    /// Ordinal of the last session in which the rule rewrote a value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_matched_session: Option<u64>,
}

impl PatternRule {
    /// Returns true if the rule applies to this entity kind and field.
    #[must_use]
    pub fn targets(&self, entity_kind: EntityKind, field: &str) -> bool {
        self.entity_kind == entity_kind && self.field == field.trim()
    }

    /// Tests a raw field value against the trigger.
    #[must_use]
    pub fn matches_value(&self, value: &str) -> bool {
        self.trigger.matches(&self.pattern_kind.normalize(value))
    }

    /// Returns true if another rule produced for the same trigger replaced this one.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Session ordinal from which idleness is measured.
    #[must_use]
    pub fn idle_since(&self) -> u64 {
        self.last_matched_session.unwrap_or(self.first_seen_session)
    }

    /// Returns true if both rules fire on the same condition.
    #[must_use]
    pub fn same_trigger(&self, other: &Self) -> bool {
        self.entity_kind == other.entity_kind
            && self.field == other.field
            && self.pattern_kind == other.pattern_kind
            && self.trigger == other.trigger
    }
}

impl fmt::Display for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}.{} {} → {}; support={}, confidence={:.2})",
            self.pattern_kind,
            self.entity_kind,
            self.field,
            self.trigger,
            self.resolution,
            self.support_count,
            self.confidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: PatternKind, field: &str, trigger: &str, resolution: &str) -> PatternRule {
        PatternRule {
            id: PatternId::derive(EntityKind::Person, field, kind, trigger, resolution),
            pattern_kind: kind,
            entity_kind: EntityKind::Person,
            field: field.to_string(),
            trigger: Trigger::new(trigger, kind.match_mode()),
            resolution: resolution.to_string(),
            support_count: 2,
            confidence: 0.4,
            created_from: Vec::new(),
            created_at: Utc::now(),
            superseded_by: None,
            first_seen_session: 0,
            last_matched_session: None,
        }
    }

    #[test]
    fn test_pattern_id_is_deterministic() {
        let a = PatternId::derive(EntityKind::Person, "role", PatternKind::RoleUnderestimate, "営業部長", "エンジニア");
        let b = PatternId::derive(EntityKind::Person, "role", PatternKind::RoleUnderestimate, "営業部長", "エンジニア");
        let c = PatternId::derive(EntityKind::Person, "role", PatternKind::RoleUnderestimate, "営業部長", "cto");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_pattern_id_separates_parts() {
        let a = PatternId::derive(EntityKind::Person, "ab", PatternKind::Custom, "c", "x");
        let b = PatternId::derive(EntityKind::Person, "a", PatternKind::Custom, "bc", "x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_for_field() {
        assert_eq!(PatternKind::for_field("name"), PatternKind::NameAlias);
        assert_eq!(PatternKind::for_field("Role"), PatternKind::RoleUnderestimate);
        assert_eq!(PatternKind::for_field("department"), PatternKind::OrganizationMisattribution);
        assert_eq!(PatternKind::for_field("owner"), PatternKind::Custom);
    }

    #[test]
    fn test_name_alias_matches_with_honorific() {
        let r = rule(PatternKind::NameAlias, "name", "まゆ", "四ノ宮まゆ");
        assert!(r.matches_value("まゆさん"));
        assert!(r.matches_value("まゆ"));
        assert!(!r.matches_value("まゆみ"));
    }

    #[test]
    fn test_organization_matches_by_containment() {
        let r = rule(PatternKind::OrganizationMisattribution, "organization", "abcグループ", "フリーランス");
        assert!(r.matches_value("ABC グループ 営業部"));
        assert!(!r.matches_value("XYZ商事"));
    }

    #[test]
    fn test_role_requires_equality() {
        let r = rule(PatternKind::RoleUnderestimate, "role", "営業部長", "エンジニア");
        assert!(r.matches_value("営業 部長"));
        assert!(!r.matches_value("第一営業部長"));
    }

    #[test]
    fn test_empty_trigger_never_matches() {
        let trigger = Trigger::new("", MatchMode::Contains);
        assert!(!trigger.matches("anything"));
    }

    #[test]
    fn test_rule_display() {
        let r = rule(PatternKind::RoleUnderestimate, "role", "営業部長", "エンジニア");
        let display = format!("{r}");
        assert!(display.contains("role_underestimate"));
        assert!(display.contains("→ エンジニア"));
        assert!(display.contains("support=2"));
    }

    #[test]
    fn test_rule_serialization_omits_empty_options() {
        let r = rule(PatternKind::Custom, "owner", "a", "b");
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("superseded_by"));
        let back: PatternRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.trigger, r.trigger);
    }
}
