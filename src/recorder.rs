//! Correction recorder.
//!
//! The only way corrections enter a knowledge base. Every correction is
//! validated here; a rejected correction is reported to the caller and
//! leaves the knowledge base untouched.

use tracing::{info, warn};

use crate::correction::{Correction, CorrectionCommand, CorrectionId};
use crate::entity::ExtractedEntities;
use crate::error::InvalidCorrection;
use crate::knowledge::KnowledgeBase;

/// Validates and appends a correction.
///
/// Recording an identical correction twice is allowed; abstraction counts
/// such duplicates as one unit of support.
///
/// # Errors
///
/// Returns `InvalidCorrection` for empty keys, fields or values and for
/// no-op corrections.
pub fn record(
    knowledge: &mut KnowledgeBase,
    correction: Correction,
) -> Result<CorrectionId, InvalidCorrection> {
    if let Err(e) = correction.validate() {
        warn!(
            entity_kind = %correction.entity_kind,
            entity_key = %correction.entity_key,
            field = %correction.field,
            error = %e,
            "rejected correction"
        );
        return Err(e);
    }

    let id = correction.id;
    info!(
        %id,
        entity_kind = %correction.entity_kind,
        entity_key = %correction.entity_key,
        field = %correction.field,
        wrong = %correction.wrong_value,
        correct = %correction.correct_value,
        "recorded correction"
    );
    knowledge.push_correction(correction);
    Ok(id)
}

/// Turns a review command into a correction against the reviewed document.
///
/// `original` must be the entities as the analyzer produced them, before
/// any knowledge was applied: the wrong value is what the analysis got
/// wrong, not what the applier already rewrote. A field absent from the
/// entity yields an empty wrong value.
///
/// `revised` is the same document after knowledge was applied. A command
/// that restores the extracted value of a field the applier rewrote
/// records the rewrite itself as wrong, marked with
/// [`reverts_rewrite`](Correction::reverts_rewrite).
///
/// # Errors
///
/// - `EntityNotFound`: no entity with that kind and key in `original`
/// - `NoOp`: the command restores the extracted value and nothing rewrote it
/// - any validation error of the resulting correction
pub fn resolve_command(
    command: &CorrectionCommand,
    original: &ExtractedEntities,
    revised: &ExtractedEntities,
) -> Result<Correction, InvalidCorrection> {
    let entity = original
        .find(command.entity_kind, &command.entity_key)
        .ok_or_else(|| InvalidCorrection::EntityNotFound {
            kind: command.entity_kind,
            key: command.entity_key.trim().to_string(),
        })?;

    let field = command.field.trim();
    let correct_value = command.correct_value.trim();
    let extracted = entity.get(field).unwrap_or_default();

    let rewritten = revised
        .find(command.entity_kind, &entity.key)
        .and_then(|e| e.get(field))
        .filter(|applied| applied.trim() != extracted.trim());
    let (wrong_value, reverts_rewrite) = match rewritten {
        Some(applied) if extracted.trim() == correct_value => (applied, true),
        _ => (extracted, false),
    };

    Correction::builder()
        .entity(command.entity_kind, entity.key.clone())
        .field(field)
        .wrong_value(wrong_value)
        .correct_value(correct_value)
        .source_document(original.document_id.clone())
        .reverts_rewrite(reverts_rewrite)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, ExtractedEntity};

    fn document() -> ExtractedEntities {
        ExtractedEntities::new("mail-42")
            .with(
                EntityKind::Person,
                ExtractedEntity::new("suzuki").with_field("role", "営業部長"),
            )
            .with(
                EntityKind::Workflow,
                ExtractedEntity::new("見積作成").with_field("owner", "まゆ"),
            )
    }

    #[test]
    fn test_record_appends() {
        let mut kb = KnowledgeBase::new();
        let c = Correction::builder()
            .entity(EntityKind::Person, "yamada")
            .field("role")
            .wrong_value("営業部長")
            .correct_value("エンジニア")
            .build()
            .unwrap();
        let id = record(&mut kb, c.clone()).unwrap();
        record(&mut kb, c).unwrap();

        assert_eq!(kb.corrections().len(), 2);
        assert_eq!(kb.corrections()[0].id, id);
    }

    #[test]
    fn test_record_rejects_tampered_noop() {
        let mut kb = KnowledgeBase::new();
        let mut c = Correction::builder()
            .entity(EntityKind::Person, "yamada")
            .field("role")
            .wrong_value("担当")
            .correct_value("部長")
            .build()
            .unwrap();
        c.correct_value = "担当".to_string();

        let err = record(&mut kb, c).unwrap_err();
        assert!(matches!(err, InvalidCorrection::NoOp { .. }));
        assert!(kb.corrections().is_empty());
    }

    #[test]
    fn test_resolve_command_uses_original_value() {
        let cmd = CorrectionCommand::new(EntityKind::Person, " suzuki", "role", "CTO");
        let c = resolve_command(&cmd, &document(), &document()).unwrap();
        assert_eq!(c.entity_key, "suzuki");
        assert_eq!(c.wrong_value, "営業部長");
        assert_eq!(c.correct_value, "CTO");
        assert_eq!(c.source_document_id, "mail-42");
    }

    #[test]
    fn test_resolve_command_missing_field() {
        let cmd = CorrectionCommand::new(EntityKind::Workflow, "見積作成", "frequency", "毎週");
        let c = resolve_command(&cmd, &document(), &document()).unwrap();
        assert!(c.wrong_value.is_empty());
    }

    #[test]
    fn test_resolve_command_unknown_entity() {
        let cmd = CorrectionCommand::new(EntityKind::Person, "tanaka", "role", "CTO");
        let err = resolve_command(&cmd, &document(), &document()).unwrap_err();
        assert!(matches!(err, InvalidCorrection::EntityNotFound { .. }));
    }

    #[test]
    fn test_resolve_command_restoring_original_is_noop() {
        let cmd = CorrectionCommand::new(EntityKind::Person, "suzuki", "role", "営業部長");
        let err = resolve_command(&cmd, &document(), &document()).unwrap_err();
        assert!(matches!(err, InvalidCorrection::NoOp { .. }));
    }

    #[test]
    fn test_resolve_command_reverting_rewrite() {
        let original = document();
        let revised = ExtractedEntities::new("mail-42").with(
            EntityKind::Person,
            ExtractedEntity::new("suzuki").with_field("role", "エンジニア"),
        );

        let cmd = CorrectionCommand::new(EntityKind::Person, "suzuki", "role", "営業部長");
        let c = resolve_command(&cmd, &original, &revised).unwrap();
        assert!(c.reverts_rewrite);
        assert_eq!(c.wrong_value, "エンジニア");
        assert_eq!(c.correct_value, "営業部長");

        // Overriding a rewrite with a third value is an ordinary correction.
        let cmd = CorrectionCommand::new(EntityKind::Person, "suzuki", "role", "部長");
        let c = resolve_command(&cmd, &original, &revised).unwrap();
        assert!(!c.reverts_rewrite);
        assert_eq!(c.wrong_value, "営業部長");
    }
}
