//! Extracted entity types.
//!
//! The learning engine does not care how entities were produced. It
//! depends on a minimal structural contract: a stable key plus a mapping
//! of field name to value, grouped by [`EntityKind`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InvalidCorrection;

/// Classification of extracted entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A person identified in a document.
    Person,
    /// A business workflow or recurring activity.
    Workflow,
    /// A free-form analytical insight.
    Insight,
}

impl EntityKind {
    /// All kinds, in canonical order.
    pub const ALL: [Self; 3] = [Self::Person, Self::Workflow, Self::Insight];

    /// Returns the snake_case name used in persisted state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Workflow => "workflow",
            Self::Insight => "insight",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = InvalidCorrection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" | "persons" => Ok(Self::Person),
            "workflow" | "workflows" => Ok(Self::Workflow),
            "insight" | "insights" => Ok(Self::Insight),
            _ => Err(InvalidCorrection::UnknownEntityKind {
                value: s.to_string(),
            }),
        }
    }
}

/// One extracted entity: a stable key plus field values.
///
/// # Examples
///
/// ```
/// use feedback_learn::ExtractedEntity;
///
/// let person = ExtractedEntity::new("yamada").with_field("role", "営業部長");
/// assert_eq!(person.get("role"), Some("営業部長"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Identifier of the entity within its source document, as originally produced.
    pub key: String,

    /// Field name to value.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ExtractedEntity {
    /// Creates an entity with no fields.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field value.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Adapts one duck-typed analyzer record.
    ///
    /// The key is taken from the first present of `key`, `name`, `title`,
    /// `id`. Scalar values become strings; arrays, objects and nulls are
    /// ignored. Returns `None` when no key can be found.
    #[must_use]
    pub fn from_json(record: &serde_json::Value) -> Option<Self> {
        let object = record.as_object()?;

        let mut fields = BTreeMap::new();
        for (name, value) in object {
            if let Some(text) = scalar_to_string(value) {
                fields.insert(name.clone(), text);
            }
        }

        let key = ["key", "name", "title", "id"]
            .iter()
            .find_map(|k| fields.get(*k).filter(|v| !v.trim().is_empty()).cloned())?;

        Some(Self { key, fields })
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The entity set extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Identity of the analyzed document.
    pub document_id: String,
    /// People identified in the document.
    #[serde(default)]
    pub persons: Vec<ExtractedEntity>,
    /// Workflows identified in the document.
    #[serde(default)]
    pub workflows: Vec<ExtractedEntity>,
    /// Insights identified in the document.
    #[serde(default)]
    pub insights: Vec<ExtractedEntity>,
}

impl ExtractedEntities {
    /// Creates an empty entity set for a document.
    #[must_use]
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Self::default()
        }
    }

    /// Adds an entity of the given kind.
    #[must_use]
    pub fn with(mut self, kind: EntityKind, entity: ExtractedEntity) -> Self {
        self.of_kind_mut(kind).push(entity);
        self
    }

    /// Entities of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: EntityKind) -> &[ExtractedEntity] {
        match kind {
            EntityKind::Person => &self.persons,
            EntityKind::Workflow => &self.workflows,
            EntityKind::Insight => &self.insights,
        }
    }

    /// Mutable entities of one kind.
    pub fn of_kind_mut(&mut self, kind: EntityKind) -> &mut Vec<ExtractedEntity> {
        match kind {
            EntityKind::Person => &mut self.persons,
            EntityKind::Workflow => &mut self.workflows,
            EntityKind::Insight => &mut self.insights,
        }
    }

    /// Iterates all entities with their kind, in canonical kind order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &ExtractedEntity)> {
        EntityKind::ALL
            .into_iter()
            .flat_map(move |kind| self.of_kind(kind).iter().map(move |e| (kind, e)))
    }

    /// Finds an entity by kind and key (trimmed comparison).
    #[must_use]
    pub fn find(&self, kind: EntityKind, key: &str) -> Option<&ExtractedEntity> {
        let key = key.trim();
        self.of_kind(kind).iter().find(|e| e.key.trim() == key)
    }

    /// Total number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.persons.len() + self.workflows.len() + self.insights.len()
    }

    /// Returns true if no entities were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adapts a raw analyzer result.
    ///
    /// Persons are read from `identified_persons` (falling back to
    /// `persons`), workflows from `workflows`, insights from `insights`.
    /// Records without a usable key are skipped.
    #[must_use]
    pub fn from_analysis_json(document_id: impl Into<String>, analysis: &serde_json::Value) -> Self {
        let collect = |names: &[&str]| -> Vec<ExtractedEntity> {
            names
                .iter()
                .find_map(|n| analysis.get(*n).and_then(serde_json::Value::as_array))
                .map(|records| records.iter().filter_map(ExtractedEntity::from_json).collect())
                .unwrap_or_default()
        };

        Self {
            document_id: document_id.into(),
            persons: collect(&["identified_persons", "persons"]),
            workflows: collect(&["workflows"]),
            insights: collect(&["insights"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("person".parse::<EntityKind>().unwrap(), EntityKind::Person);
        assert_eq!(" Workflow ".parse::<EntityKind>().unwrap(), EntityKind::Workflow);
        assert_eq!("insights".parse::<EntityKind>().unwrap(), EntityKind::Insight);
        assert!(matches!(
            "robot".parse::<EntityKind>(),
            Err(InvalidCorrection::UnknownEntityKind { .. })
        ));
    }

    #[test]
    fn test_entity_kind_serde_names() {
        let json = serde_json::to_string(&EntityKind::Workflow).unwrap();
        assert_eq!(json, "\"workflow\"");
    }

    #[test]
    fn test_from_json_picks_name_as_key() {
        let record = serde_json::json!({
            "name": "山田",
            "role": "営業部長",
            "age": 42,
            "activities": ["仲介"]
        });
        let entity = ExtractedEntity::from_json(&record).unwrap();
        assert_eq!(entity.key, "山田");
        assert_eq!(entity.get("role"), Some("営業部長"));
        assert_eq!(entity.get("age"), Some("42"));
        assert_eq!(entity.get("activities"), None);
    }

    #[test]
    fn test_from_json_without_key_is_skipped() {
        let record = serde_json::json!({ "role": "担当" });
        assert!(ExtractedEntity::from_json(&record).is_none());
    }

    #[test]
    fn test_from_analysis_json() {
        let analysis = serde_json::json!({
            "identified_persons": [{ "name": "まゆ", "role": "担当" }, { "role": "no key" }],
            "workflows": [{ "name": "見積作成", "owner": "まゆ" }],
            "insights": []
        });
        let entities = ExtractedEntities::from_analysis_json("doc-1", &analysis);
        assert_eq!(entities.document_id, "doc-1");
        assert_eq!(entities.persons.len(), 1);
        assert_eq!(entities.workflows.len(), 1);
        assert!(entities.insights.is_empty());
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn test_iter_is_kind_ordered() {
        let entities = ExtractedEntities::new("doc")
            .with(EntityKind::Insight, ExtractedEntity::new("i"))
            .with(EntityKind::Person, ExtractedEntity::new("p"))
            .with(EntityKind::Workflow, ExtractedEntity::new("w"));
        let kinds: Vec<_> = entities.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![EntityKind::Person, EntityKind::Workflow, EntityKind::Insight]);
    }

    #[test]
    fn test_find_trims_key() {
        let entities = ExtractedEntities::new("doc")
            .with(EntityKind::Person, ExtractedEntity::new("suzuki "));
        assert!(entities.find(EntityKind::Person, "suzuki").is_some());
        assert!(entities.find(EntityKind::Workflow, "suzuki").is_none());
    }
}
