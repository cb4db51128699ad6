//! Human-readable summary of what has been learned.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::correction::Correction;
use crate::knowledge::KnowledgeBase;
use crate::pattern::{PatternKind, PatternRule};

/// Rules listed per pattern kind.
pub const RULES_PER_KIND: usize = 3;

/// Most recent corrections listed.
pub const RECENT_CORRECTIONS: usize = 5;

/// Rules of one pattern kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    /// Rules of this kind, superseded included.
    pub total: usize,
    /// Highest-confidence rules first.
    pub top: Vec<PatternRule>,
}

/// Snapshot statistics of a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningReport {
    /// Every recorded correction.
    pub total_corrections: usize,
    /// Corrections after collapsing repeated identical fixes.
    pub distinct_corrections: usize,
    /// Every retained rule.
    pub total_rules: usize,
    /// Rules replaced by a newer rule for the same trigger.
    pub superseded_rules: usize,
    /// Sessions persisted so far.
    pub sessions_completed: u64,
    /// Rule summary per pattern kind.
    pub rules_by_kind: BTreeMap<PatternKind, KindSummary>,
    /// Newest first.
    pub recent_corrections: Vec<Correction>,
}

impl LearningReport {
    /// Builds the report.
    #[must_use]
    pub fn from_knowledge(knowledge: &KnowledgeBase) -> Self {
        let distinct_corrections = knowledge
            .corrections()
            .iter()
            .map(Correction::support_key)
            .collect::<BTreeSet<_>>()
            .len();

        let mut rules_by_kind: BTreeMap<PatternKind, Vec<&PatternRule>> = BTreeMap::new();
        for rule in knowledge.rules() {
            rules_by_kind.entry(rule.pattern_kind).or_default().push(rule);
        }
        let rules_by_kind = rules_by_kind
            .into_iter()
            .map(|(kind, mut rules)| {
                rules.sort_by(|a, b| {
                    b.confidence
                        .total_cmp(&a.confidence)
                        .then(b.support_count.cmp(&a.support_count))
                });
                let summary = KindSummary {
                    total: rules.len(),
                    top: rules.into_iter().take(RULES_PER_KIND).cloned().collect(),
                };
                (kind, summary)
            })
            .collect();

        let mut recent: Vec<&Correction> = knowledge.corrections().iter().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Self {
            total_corrections: knowledge.corrections().len(),
            distinct_corrections,
            total_rules: knowledge.rules().len(),
            superseded_rules: knowledge.rules().iter().filter(|r| r.is_superseded()).count(),
            sessions_completed: knowledge.sessions_completed(),
            rules_by_kind,
            recent_corrections: recent.into_iter().take(RECENT_CORRECTIONS).cloned().collect(),
        }
    }
}

impl fmt::Display for LearningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Learning report")?;
        writeln!(
            f,
            "  corrections:        {} ({} distinct)",
            self.total_corrections, self.distinct_corrections
        )?;
        writeln!(
            f,
            "  pattern rules:      {} ({} superseded)",
            self.total_rules, self.superseded_rules
        )?;
        writeln!(f, "  sessions completed: {}", self.sessions_completed)?;

        for (kind, summary) in &self.rules_by_kind {
            writeln!(f)?;
            writeln!(f, "{kind} ({} rules)", summary.total)?;
            for rule in &summary.top {
                writeln!(f, "  - {rule}")?;
            }
        }

        if !self.recent_corrections.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recent corrections")?;
            for c in &self.recent_corrections {
                writeln!(
                    f,
                    "  - {} {} '{}' {}: '{}' → '{}'",
                    c.timestamp.format("%Y-%m-%d %H:%M"),
                    c.entity_kind,
                    c.entity_key,
                    c.field,
                    c.wrong_value,
                    c.correct_value
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::abstraction::PatternAbstractor;
    use crate::entity::EntityKind;

    fn fix(key: &str, wrong: &str, correct: &str, minutes: i64) -> Correction {
        Correction::builder()
            .entity(EntityKind::Person, key)
            .field("role")
            .wrong_value(wrong)
            .correct_value(correct)
            .timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_report() {
        let report = LearningReport::from_knowledge(&KnowledgeBase::new());
        assert_eq!(report.total_corrections, 0);
        assert!(report.rules_by_kind.is_empty());
        let text = report.to_string();
        assert!(text.contains("corrections:        0"));
        assert!(!text.contains("Recent corrections"));
    }

    #[test]
    fn test_report_counts_and_limits() {
        let mut kb = KnowledgeBase::new();
        for (i, key) in ["a", "a", "b", "c", "d", "e", "f"].iter().enumerate() {
            kb.push_correction(fix(key, "営業部長", "エンジニア", i as i64));
        }
        PatternAbstractor::default().run(&mut kb, 1);

        let report = LearningReport::from_knowledge(&kb);
        assert_eq!(report.total_corrections, 7);
        assert_eq!(report.distinct_corrections, 6);
        assert_eq!(report.total_rules, 1);
        assert_eq!(report.recent_corrections.len(), RECENT_CORRECTIONS);
        assert_eq!(report.recent_corrections[0].entity_key, "f");
        assert_eq!(report.rules_by_kind[&PatternKind::RoleUnderestimate].total, 1);

        let text = report.to_string();
        assert!(text.contains("role_underestimate (1 rules)"));
        assert!(text.contains("2024-05-01 08:06 person 'f' role"));
    }
}
