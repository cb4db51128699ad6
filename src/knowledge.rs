//! The knowledge base aggregate.
//!
//! A [`KnowledgeBase`] owns every correction and pattern rule for the
//! lifetime of the system. It is an explicit value: loaded from a store,
//! passed through a session, saved back. There is no ambient instance.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::RetentionPolicy;
use crate::correction::{Correction, CorrectionId};
use crate::entity::EntityKind;
use crate::pattern::{PatternId, PatternRule};

/// Outcome of merging freshly derived rules into the knowledge base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Rules seen for the first time.
    pub added: usize,
    /// Existing rules whose support changed.
    pub updated: usize,
    /// Existing rules that were already up to date.
    pub unchanged: usize,
    /// Retained rules newly marked as superseded.
    pub superseded: usize,
}

impl MergeSummary {
    /// Returns true if the merge changed any rule.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.superseded > 0
    }
}

/// Persisted records that failed to decode, kept verbatim.
///
/// They are written back on every save so that a record this build cannot
/// read is never lost.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct UnreadableRecords {
    pub(crate) corrections: Vec<Value>,
    pub(crate) rules: Vec<Value>,
}

impl UnreadableRecords {
    fn len(&self) -> usize {
        self.corrections.len() + self.rules.len()
    }
}

/// All corrections and pattern rules, plus session bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    corrections: Vec<Correction>,
    rules: Vec<PatternRule>,
    #[serde(default)]
    sessions_completed: u64,
    #[serde(skip)]
    unreadable: UnreadableRecords,
}

impl KnowledgeBase {
    /// Creates an empty knowledge base.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        corrections: Vec<Correction>,
        rules: Vec<PatternRule>,
        sessions_completed: u64,
        unreadable: UnreadableRecords,
    ) -> Self {
        Self {
            corrections,
            rules,
            sessions_completed,
            unreadable,
        }
    }

    /// Corrections in the order they were recorded.
    #[must_use]
    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    /// Pattern rules, current and superseded.
    #[must_use]
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Number of sessions that persisted successfully.
    #[must_use]
    pub const fn sessions_completed(&self) -> u64 {
        self.sessions_completed
    }

    /// Ordinal of the session currently working on this snapshot.
    #[must_use]
    pub const fn current_session(&self) -> u64 {
        self.sessions_completed + 1
    }

    /// Number of persisted records that could not be decoded.
    ///
    /// They take no part in learning but are preserved on save.
    #[must_use]
    pub fn unreadable_records(&self) -> usize {
        self.unreadable.len()
    }

    pub(crate) const fn unreadable(&self) -> &UnreadableRecords {
        &self.unreadable
    }

    /// Returns true if nothing has been learned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty() && self.rules.is_empty()
    }

    /// Looks up a correction by ID.
    #[must_use]
    pub fn correction(&self, id: CorrectionId) -> Option<&Correction> {
        self.corrections.iter().find(|c| c.id == id)
    }

    /// Looks up a rule by ID.
    #[must_use]
    pub fn rule(&self, id: PatternId) -> Option<&PatternRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Rules targeting an entity kind and field.
    pub fn rules_for<'a>(
        &'a self,
        entity_kind: EntityKind,
        field: &'a str,
    ) -> impl Iterator<Item = &'a PatternRule> + 'a {
        self.rules.iter().filter(move |r| r.targets(entity_kind, field))
    }

    /// Newest correction recorded for exactly this entity field value.
    ///
    /// Ties on timestamp go to the later record.
    #[must_use]
    pub fn latest_exact(
        &self,
        kind: EntityKind,
        key: &str,
        field: &str,
        value: &str,
    ) -> Option<&Correction> {
        self.corrections
            .iter()
            .filter(|c| c.matches_exact(kind, key, field, value))
            .fold(None, |best: Option<&Correction>, c| match best {
                Some(b) if b.timestamp > c.timestamp => Some(b),
                _ => Some(c),
            })
    }

    /// Newest correction per field recorded against a field the analysis
    /// left out (empty wrong value) for this entity.
    ///
    /// Ties on timestamp go to the later record.
    #[must_use]
    pub fn latest_fills(&self, kind: EntityKind, key: &str) -> BTreeMap<&str, &Correction> {
        let mut fills: BTreeMap<&str, &Correction> = BTreeMap::new();
        let candidates = self.corrections.iter().filter(|c| {
            c.entity_kind == kind && c.entity_key.trim() == key.trim() && c.wrong_value.trim().is_empty()
        });
        for correction in candidates {
            match fills.entry(correction.field.trim()) {
                Entry::Occupied(mut slot) => {
                    if correction.timestamp >= slot.get().timestamp {
                        slot.insert(correction);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(correction);
                }
            }
        }
        fills
    }

    /// Appends a validated correction. Only the recorder calls this.
    pub(crate) fn push_correction(&mut self, correction: Correction) {
        self.corrections.push(correction);
    }

    pub(crate) fn complete_session(&mut self) {
        self.sessions_completed += 1;
    }

    /// Records that the given rules rewrote values in `session`.
    pub fn mark_matched(&mut self, ids: &[PatternId], session: u64) {
        for rule in self.rules.iter_mut().filter(|r| ids.contains(&r.id)) {
            rule.last_matched_session = Some(session);
        }
    }

    /// Merges the complete output of an abstraction pass.
    ///
    /// `derived` must be everything the abstractor produced for the current
    /// history. Rules with a known id are refreshed in place; unknown ids are
    /// added with `session` as their first session. Retained rules absent
    /// from `derived` are never deleted: they are marked superseded by the
    /// derived rule sharing their trigger, when there is one.
    pub fn merge_rules(&mut self, derived: Vec<PatternRule>, session: u64) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let derived_ids: HashSet<PatternId> = derived.iter().map(|r| r.id).collect();

        for mut rule in derived {
            if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
                rule.first_seen_session = existing.first_seen_session;
                rule.last_matched_session = existing.last_matched_session;
                rule.superseded_by = None;

                if *existing == rule {
                    summary.unchanged += 1;
                } else {
                    debug!(rule = %rule, "refreshing pattern rule");
                    *existing = rule;
                    summary.updated += 1;
                }
            } else {
                info!(rule = %rule, "new pattern rule");
                rule.first_seen_session = session;
                rule.last_matched_session = None;
                rule.superseded_by = None;
                self.rules.push(rule);
                summary.added += 1;
            }
        }

        let current: Vec<PatternRule> = self
            .rules
            .iter()
            .filter(|r| derived_ids.contains(&r.id))
            .cloned()
            .collect();

        for rule in self.rules.iter_mut().filter(|r| !derived_ids.contains(&r.id)) {
            let Some(replacement) = current.iter().find(|c| c.same_trigger(rule)) else {
                continue;
            };
            if rule.superseded_by != Some(replacement.id) {
                debug!(old = %rule.id, new = %replacement.id, "pattern rule superseded");
                rule.superseded_by = Some(replacement.id);
                summary.superseded += 1;
            }
        }

        self.rules.sort_by(|a, b| {
            (a.entity_kind, &a.field, a.pattern_kind, &a.trigger.text, a.id)
                .cmp(&(b.entity_kind, &b.field, b.pattern_kind, &b.trigger.text, b.id))
        });

        summary
    }

    /// Drops superseded rules that have been idle for too long.
    ///
    /// Does nothing when the policy has no limit. Returns the removed ids.
    pub fn prune_idle_rules(&mut self, policy: &RetentionPolicy) -> Vec<PatternId> {
        let Some(max_idle) = policy.max_idle_sessions else {
            return Vec::new();
        };

        let now = self.sessions_completed;
        let mut removed = Vec::new();
        self.rules.retain(|rule| {
            let idle = now.saturating_sub(rule.idle_since());
            if rule.is_superseded() && idle >= max_idle {
                removed.push(rule.id);
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            info!(count = removed.len(), "pruned idle superseded rules");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::pattern::{PatternKind, Trigger};

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    fn fix(key: &str, wrong: &str, correct: &str, offset_secs: i64) -> Correction {
        Correction::builder()
            .entity(EntityKind::Person, key)
            .field("role")
            .wrong_value(wrong)
            .correct_value(correct)
            .timestamp(at(offset_secs))
            .build()
            .unwrap()
    }

    fn rule(trigger: &str, resolution: &str, support: u32) -> PatternRule {
        let kind = PatternKind::RoleUnderestimate;
        PatternRule {
            id: PatternId::derive(EntityKind::Person, "role", kind, trigger, resolution),
            pattern_kind: kind,
            entity_kind: EntityKind::Person,
            field: "role".to_string(),
            trigger: Trigger::new(trigger, kind.match_mode()),
            resolution: resolution.to_string(),
            support_count: support,
            confidence: 0.2 * support as f32,
            created_from: Vec::new(),
            created_at: at(0),
            superseded_by: None,
            first_seen_session: 0,
            last_matched_session: None,
        }
    }

    #[test]
    fn test_latest_exact_prefers_newest() {
        let mut kb = KnowledgeBase::new();
        kb.push_correction(fix("yamada", "担当", "部長", 0));
        kb.push_correction(fix("yamada", "担当", "社長", 10));
        kb.push_correction(fix("tanaka", "担当", "CTO", 20));

        let hit = kb.latest_exact(EntityKind::Person, "yamada", "role", "担当").unwrap();
        assert_eq!(hit.correct_value, "社長");
        assert!(kb.latest_exact(EntityKind::Person, "suzuki", "role", "担当").is_none());
    }

    #[test]
    fn test_merge_adds_then_unchanged() {
        let mut kb = KnowledgeBase::new();
        let summary = kb.merge_rules(vec![rule("営業部長", "エンジニア", 2)], 1);
        assert_eq!(summary.added, 1);
        assert_eq!(kb.rules()[0].first_seen_session, 1);

        let summary = kb.merge_rules(vec![rule("営業部長", "エンジニア", 2)], 2);
        assert_eq!(summary.unchanged, 1);
        assert!(!summary.changed());
        assert_eq!(kb.rules()[0].first_seen_session, 1);
    }

    #[test]
    fn test_merge_updates_support_and_keeps_match_history() {
        let mut kb = KnowledgeBase::new();
        kb.merge_rules(vec![rule("営業部長", "エンジニア", 2)], 1);
        let id = kb.rules()[0].id;
        kb.mark_matched(&[id], 1);

        let summary = kb.merge_rules(vec![rule("営業部長", "エンジニア", 3)], 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(kb.rules()[0].support_count, 3);
        assert_eq!(kb.rules()[0].last_matched_session, Some(1));
    }

    #[test]
    fn test_merge_retains_and_supersedes() {
        let mut kb = KnowledgeBase::new();
        kb.merge_rules(vec![rule("営業部長", "エンジニア", 2)], 1);
        let old_id = kb.rules()[0].id;

        let summary = kb.merge_rules(vec![rule("営業部長", "CTO", 3)], 2);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.superseded, 1);
        assert_eq!(kb.rules().len(), 2);

        let old = kb.rule(old_id).unwrap();
        assert!(old.is_superseded());
    }

    #[test]
    fn test_prune_only_idle_superseded() {
        let mut kb = KnowledgeBase::new();
        kb.merge_rules(vec![rule("営業部長", "エンジニア", 2)], 1);
        kb.merge_rules(vec![rule("営業部長", "CTO", 3)], 2);
        for _ in 0..5 {
            kb.complete_session();
        }

        let policy = RetentionPolicy {
            max_idle_sessions: Some(3),
        };
        let removed = kb.prune_idle_rules(&policy);
        assert_eq!(removed.len(), 1);
        assert_eq!(kb.rules().len(), 1);
        assert_eq!(kb.rules()[0].resolution, "CTO");
    }

    #[test]
    fn test_prune_disabled_by_default() {
        let mut kb = KnowledgeBase::new();
        kb.merge_rules(vec![rule("a", "b", 2)], 1);
        kb.merge_rules(vec![rule("a", "c", 2)], 1);
        for _ in 0..100 {
            kb.complete_session();
        }
        assert!(kb.prune_idle_rules(&RetentionPolicy::default()).is_empty());
        assert_eq!(kb.rules().len(), 2);
    }

    #[test]
    fn test_current_session() {
        let mut kb = KnowledgeBase::new();
        assert_eq!(kb.current_session(), 1);
        kb.complete_session();
        assert_eq!(kb.sessions_completed(), 1);
        assert_eq!(kb.current_session(), 2);
    }

    #[test]
    fn test_latest_fills_only_missing_field_corrections() {
        let fill = |field: &str, value: &str, offset| {
            Correction::builder()
                .entity(EntityKind::Workflow, "請求処理")
                .field(field)
                .correct_value(value)
                .timestamp(at(offset))
                .build()
                .unwrap()
        };
        let mut kb = KnowledgeBase::new();
        kb.push_correction(fill("owner", "総務部", 0));
        kb.push_correction(fill("owner", "経理部", 10));
        kb.push_correction(fill("frequency", "毎月", 5));
        kb.push_correction(fix("請求処理", "担当", "部長", 20));

        let fills = kb.latest_fills(EntityKind::Workflow, " 請求処理 ");
        assert_eq!(fills.len(), 2);
        assert_eq!(fills["owner"].correct_value, "経理部");
        assert_eq!(fills["frequency"].correct_value, "毎月");
        assert!(kb.latest_fills(EntityKind::Person, "請求処理").is_empty());
    }
}
