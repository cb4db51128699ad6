//! Knowledge base storage.
//!
//! [`KnowledgeStore`] is the load/save contract. Two backends implement it:
//! [`JsonFileStore`] for durable, human-inspectable state and
//! [`InMemoryKnowledgeStore`] for embedding and tests.

mod document;
mod file;
mod memory;
mod traits;

pub use document::{decode_document, encode_document, SCHEMA_VERSION};
pub use file::{JsonFileStore, StagedSave};
pub use memory::InMemoryKnowledgeStore;
pub use traits::{KnowledgeStore, StoreError};
