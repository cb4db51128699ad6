//! Persisted document layout.
//!
//! The knowledge base is stored as one pretty-printed JSON document:
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "sessions_completed": 3,
//!   "corrections": [ { ...Correction... }, ... ],
//!   "rules": [ { ...PatternRule... }, ... ]
//! }
//! ```
//!
//! Decoding is lenient per record: a record that fails to decode or
//! validate is set aside with a warning and written back verbatim on the
//! next save, after the readable records of its collection. Only a document
//! that cannot be parsed as a whole is reported as corrupt.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::correction::Correction;
use crate::knowledge::{KnowledgeBase, UnreadableRecords};
use crate::pattern::PatternRule;
use crate::storage::traits::StoreError;

/// Current persisted schema version.
pub const SCHEMA_VERSION: u64 = 1;

#[derive(Serialize)]
struct PersistedKnowledge<'a> {
    schema_version: u64,
    sessions_completed: u64,
    corrections: Records<'a, Correction>,
    rules: Records<'a, PatternRule>,
}

/// One persisted collection: decoded records, then unreadable ones.
struct Records<'a, T> {
    decoded: &'a [T],
    unreadable: &'a [Value],
}

impl<T: Serialize> Serialize for Records<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.decoded.len() + self.unreadable.len()))?;
        for record in self.decoded {
            seq.serialize_element(record)?;
        }
        for raw in self.unreadable {
            seq.serialize_element(raw)?;
        }
        seq.end()
    }
}

/// Serializes a knowledge base into its persisted form.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if a record cannot be serialized.
pub fn encode_document(knowledge: &KnowledgeBase) -> Result<Vec<u8>, StoreError> {
    let unreadable = knowledge.unreadable();
    let document = PersistedKnowledge {
        schema_version: SCHEMA_VERSION,
        sessions_completed: knowledge.sessions_completed(),
        corrections: Records {
            decoded: knowledge.corrections(),
            unreadable: &unreadable.corrections,
        },
        rules: Records {
            decoded: knowledge.rules(),
            unreadable: &unreadable.rules,
        },
    };
    let mut bytes = serde_json::to_vec_pretty(&document)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parses a persisted document read from `path`.
///
/// # Errors
///
/// - `Corrupt`: the bytes are not a JSON object, or a collection is not an array
/// - `UnsupportedVersion`: the document was written by a newer schema
pub fn decode_document(path: &Path, bytes: &[u8]) -> Result<KnowledgeBase, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    let Value::Object(mut root) = value else {
        return Err(corrupt("top-level value is not an object".to_string()));
    };

    let version = match root.get("schema_version") {
        None => SCHEMA_VERSION,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| corrupt(format!("schema_version is not an unsigned integer: {v}")))?,
    };
    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let sessions_completed = root
        .get("sessions_completed")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let (corrections, unreadable_corrections) =
        take_records(&mut root, "corrections", |c: &Correction| c.validate().map_err(|e| e.to_string()))
            .map_err(corrupt)?;

    let mut seen = HashSet::new();
    let (rules, unreadable_rules) = take_records(&mut root, "rules", |r: &PatternRule| {
        if r.trigger.text.is_empty() || r.resolution.trim().is_empty() {
            return Err("empty trigger or resolution".to_string());
        }
        if !seen.insert(r.id) {
            return Err(format!("duplicate rule id {}", r.id));
        }
        Ok(())
    })
    .map_err(corrupt)?;

    let unreadable = UnreadableRecords {
        corrections: unreadable_corrections,
        rules: unreadable_rules,
    };
    Ok(KnowledgeBase::from_parts(corrections, rules, sessions_completed, unreadable))
}

/// Splits a collection into decoded records and the raw records that failed.
fn take_records<T, F>(
    root: &mut Map<String, Value>,
    collection: &str,
    mut check: F,
) -> Result<(Vec<T>, Vec<Value>), String>
where
    T: DeserializeOwned,
    F: FnMut(&T) -> Result<(), String>,
{
    let records = match root.remove(collection) {
        None | Some(Value::Null) => return Ok((Vec::new(), Vec::new())),
        Some(Value::Array(records)) => records,
        Some(other) => return Err(format!("'{collection}' is not an array: {other}")),
    };

    let mut decoded = Vec::with_capacity(records.len());
    let mut unreadable = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        let item = serde_json::from_value::<T>(record.clone())
            .map_err(|e| e.to_string())
            .and_then(|item| check(&item).map(|()| item));
        match item {
            Ok(item) => decoded.push(item),
            Err(reason) => {
                warn!(collection, index, %reason, "keeping unreadable record aside");
                unreadable.push(record);
            }
        }
    }
    Ok((decoded, unreadable))
}
