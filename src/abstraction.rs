//! Pattern abstraction.
//!
//! Turns the raw correction history into generalized rules. Abstraction is
//! a pure function of the correction collection: the same history always
//! yields the same rules, ids included. There is no incremental state.
//!
//! # Algorithm
//!
//! 1. Skip corrections that fail validation or have nothing to generalize
//!    (empty wrong value or trigger, or a reverted rewrite).
//! 2. Order the rest by (entity kind, field, timestamp), stable on record order.
//! 3. Cluster by (entity kind, field, trigger), where the trigger is the
//!    wrong value normalized for the field's [`PatternKind`].
//! 4. Within a cluster, count distinct support units per resolution.
//!    Repeated identical fixes of one entity count once.
//! 5. The resolution with the most units wins; ties go to the resolution
//!    of the most recent correction.
//! 6. Emit a rule when the winner reaches the support threshold.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::confidence::ConfidenceScale;
use crate::config::LearningConfig;
use crate::correction::{Correction, CorrectionId, SupportKey};
use crate::entity::EntityKind;
use crate::knowledge::{KnowledgeBase, MergeSummary};
use crate::pattern::{PatternId, PatternKind, PatternRule, Trigger};

type ClusterKey = (EntityKind, String, String);

#[derive(Debug)]
struct Candidate {
    units: BTreeSet<SupportKey>,
    supporting: Vec<CorrectionId>,
    newest: DateTime<Utc>,
    last_position: usize,
}

impl Candidate {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            units: BTreeSet::new(),
            supporting: Vec::new(),
            newest: timestamp,
            last_position: 0,
        }
    }

    fn add(&mut self, position: usize, correction: &Correction) {
        self.units.insert(correction.support_key());
        self.supporting.push(correction.id);
        self.newest = self.newest.max(correction.timestamp);
        self.last_position = position;
    }

    fn support(&self) -> u32 {
        u32::try_from(self.units.len()).unwrap_or(u32::MAX)
    }
}

/// Derives pattern rules from correction history.
#[derive(Debug, Clone, Copy)]
pub struct PatternAbstractor {
    support_threshold: u32,
    scale: ConfidenceScale,
}

impl Default for PatternAbstractor {
    fn default() -> Self {
        Self::new(&LearningConfig::default())
    }
}

impl PatternAbstractor {
    /// Creates an abstractor using the configured threshold and scale.
    #[must_use]
    pub fn new(config: &LearningConfig) -> Self {
        Self {
            support_threshold: config.support_threshold,
            scale: config.confidence,
        }
    }

    /// Minimum distinct support for a rule.
    #[must_use]
    pub const fn support_threshold(&self) -> u32 {
        self.support_threshold
    }

    /// Derives every rule supported by `corrections`.
    ///
    /// Output order is deterministic: sorted by entity kind, field and trigger.
    #[must_use]
    pub fn abstract_rules(&self, corrections: &[Correction]) -> Vec<PatternRule> {
        let mut eligible: Vec<&Correction> = corrections
            .iter()
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(id = %c.id, error = %e, "skipping malformed correction during abstraction");
                    false
                }
            })
            .filter(|c| !c.reverts_rewrite && !c.wrong_value.trim().is_empty())
            .collect();
        eligible.sort_by(|a, b| {
            (a.entity_kind, a.field.trim(), a.timestamp).cmp(&(b.entity_kind, b.field.trim(), b.timestamp))
        });

        let mut clusters: BTreeMap<ClusterKey, BTreeMap<String, Candidate>> = BTreeMap::new();
        for (position, correction) in eligible.into_iter().enumerate() {
            let trigger = correction.trigger_text();
            if trigger.is_empty() {
                continue;
            }
            let key = (correction.entity_kind, correction.field.trim().to_string(), trigger);
            clusters
                .entry(key)
                .or_default()
                .entry(correction.correct_value.trim().to_string())
                .or_insert_with(|| Candidate::new(correction.timestamp))
                .add(position, correction);
        }

        let mut rules = Vec::new();
        for ((entity_kind, field, trigger), candidates) in clusters {
            let Some((resolution, winner)) = candidates
                .into_iter()
                .max_by_key(|(_, c)| (c.units.len(), c.last_position))
            else {
                continue;
            };

            let support_count = winner.support();
            if support_count < self.support_threshold {
                debug!(%entity_kind, %field, %trigger, support_count, "cluster below threshold");
                continue;
            }

            let pattern_kind = PatternKind::for_field(&field);
            rules.push(PatternRule {
                id: PatternId::derive(entity_kind, &field, pattern_kind, &trigger, &resolution),
                pattern_kind,
                entity_kind,
                trigger: Trigger::new(trigger, pattern_kind.match_mode()),
                field,
                resolution,
                support_count,
                confidence: self.scale.confidence(support_count),
                created_from: winner.supporting,
                created_at: winner.newest,
                superseded_by: None,
                first_seen_session: 0,
                last_matched_session: None,
            });
        }
        rules
    }

    /// Re-derives all rules and merges them into the knowledge base.
    pub fn run(&self, knowledge: &mut KnowledgeBase, session: u64) -> MergeSummary {
        let derived = self.abstract_rules(knowledge.corrections());
        let summary = knowledge.merge_rules(derived, session);
        debug!(?summary, "abstraction merged");
        summary
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn fix(key: &str, field: &str, wrong: &str, correct: &str, minutes: i64) -> Correction {
        Correction::builder()
            .entity(EntityKind::Person, key)
            .field(field)
            .wrong_value(wrong)
            .correct_value(correct)
            .source_document(format!("doc-{minutes}"))
            .timestamp(at(minutes))
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_entity_fix_collapses() {
        let history = vec![
            fix("yamada", "role", "営業部長", "エンジニア", 0),
            fix("yamada", "role", "営業部長", "エンジニア", 5),
            fix("tanaka", "role", "営業部長", "エンジニア", 10),
        ];
        let rules = PatternAbstractor::default().abstract_rules(&history);

        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.pattern_kind, PatternKind::RoleUnderestimate);
        assert_eq!(rule.trigger.text, "営業部長");
        assert_eq!(rule.resolution, "エンジニア");
        assert_eq!(rule.support_count, 2);
        assert!((rule.confidence - 0.4).abs() < f32::EPSILON);
        assert_eq!(rule.created_from.len(), 3);
        assert_eq!(rule.created_at, at(10));
    }

    #[test]
    fn test_single_unit_never_emits() {
        let history = vec![
            fix("yamada", "role", "営業部長", "エンジニア", 0),
            fix("yamada", "role", "営業部長", "エンジニア", 1),
            fix("yamada", "role", "営業部長", "エンジニア", 2),
        ];
        assert!(PatternAbstractor::default().abstract_rules(&history).is_empty());
    }

    #[test]
    fn test_tie_prefers_most_recent() {
        let history = vec![
            fix("a", "role", "担当", "課長", 0),
            fix("b", "role", "担当", "課長", 1),
            fix("c", "role", "担当", "部長", 2),
            fix("d", "role", "担当", "部長", 3),
        ];
        let rules = PatternAbstractor::default().abstract_rules(&history);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resolution, "部長");

        let mut reordered = history.clone();
        reordered[0].timestamp = at(10);
        reordered[1].timestamp = at(11);
        let rules = PatternAbstractor::default().abstract_rules(&reordered);
        assert_eq!(rules[0].resolution, "課長");
    }

    #[test]
    fn test_majority_beats_recency() {
        let history = vec![
            fix("a", "role", "担当", "課長", 0),
            fix("b", "role", "担当", "課長", 1),
            fix("c", "role", "担当", "課長", 2),
            fix("d", "role", "担当", "部長", 3),
            fix("e", "role", "担当", "部長", 4),
        ];
        let rules = PatternAbstractor::default().abstract_rules(&history);
        assert_eq!(rules[0].resolution, "課長");
        assert_eq!(rules[0].support_count, 3);
    }

    #[test]
    fn test_name_triggers_ignore_honorifics() {
        let history = vec![
            fix("p1", "name", "まゆさん", "四ノ宮まゆ", 0),
            fix("p2", "name", "まゆ", "四ノ宮まゆ", 1),
        ];
        let rules = PatternAbstractor::default().abstract_rules(&history);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pattern_kind, PatternKind::NameAlias);
        assert_eq!(rules[0].trigger.text, "まゆ");
    }

    #[test]
    fn test_fields_cluster_separately() {
        let history = vec![
            fix("a", "role", "営業", "エンジニア", 0),
            fix("b", "title", "営業", "エンジニア", 1),
        ];
        assert!(PatternAbstractor::default().abstract_rules(&history).is_empty());
    }

    #[test]
    fn test_missing_wrong_value_is_ignored() {
        let history = vec![
            fix("a", "owner", "", "経理部", 0),
            fix("b", "owner", "", "経理部", 1),
        ];
        assert!(PatternAbstractor::default().abstract_rules(&history).is_empty());
    }

    #[test]
    fn test_malformed_correction_skipped() {
        let mut broken = fix("c", "role", "営業部長", "エンジニア", 2);
        broken.correct_value.clear();
        let history = vec![
            fix("a", "role", "営業部長", "エンジニア", 0),
            broken,
            fix("b", "role", "営業部長", "エンジニア", 1),
        ];
        let rules = PatternAbstractor::default().abstract_rules(&history);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].support_count, 2);
    }

    #[test]
    fn test_higher_threshold() {
        let config = LearningConfig {
            support_threshold: 3,
            ..LearningConfig::default()
        };
        let history = vec![
            fix("a", "role", "営業部長", "エンジニア", 0),
            fix("b", "role", "営業部長", "エンジニア", 1),
        ];
        assert!(PatternAbstractor::new(&config).abstract_rules(&history).is_empty());
    }

    #[test]
    fn test_run_is_idempotent() {
        let mut kb = KnowledgeBase::new();
        for c in [
            fix("a", "organization", "ABC グループ", "フリーランス", 0),
            fix("b", "organization", "abcグループ", "フリーランス", 1),
        ] {
            kb.push_correction(c);
        }
        let abstractor = PatternAbstractor::default();

        let first = abstractor.run(&mut kb, 1);
        assert_eq!(first.added, 1);
        let snapshot = kb.rules().to_vec();

        let second = abstractor.run(&mut kb, 2);
        assert!(!second.changed());
        assert_eq!(kb.rules(), snapshot.as_slice());
    }

    #[test]
    fn test_reverted_rewrites_do_not_generalize() {
        let revert = |key: &str, minutes| {
            Correction::builder()
                .entity(EntityKind::Person, key)
                .field("role")
                .wrong_value("エンジニア")
                .correct_value("営業部長")
                .timestamp(at(minutes))
                .reverts_rewrite(true)
                .build()
                .unwrap()
        };
        let history = vec![revert("suzuki", 0), revert("sato", 1)];
        assert!(PatternAbstractor::default().abstract_rules(&history).is_empty());
    }
}
