//! In-memory storage backend.
//!
//! Keeps the "persisted" knowledge base in memory. Intended for embedded
//! usage and tests; it can simulate save failures and corrupt loads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::knowledge::KnowledgeBase;
use crate::storage::traits::{KnowledgeStore, StoreError};

const LOCATION: &str = "memory";

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory knowledge store.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    persisted: RwLock<Option<KnowledgeBase>>,
    fail_saves: AtomicBool,
    corrupt: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryKnowledgeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds a knowledge base.
    #[must_use]
    pub fn with_knowledge(knowledge: KnowledgeBase) -> Self {
        Self {
            persisted: RwLock::new(Some(knowledge)),
            ..Self::default()
        }
    }

    /// Makes every following `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Makes `load` report a corrupt store until `quarantine` is called.
    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of the currently persisted knowledge base.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Option<KnowledgeBase>, StoreError> {
        let guard = self.persisted.read().map_err(|_| lock_err("snapshot"))?;
        Ok(guard.clone())
    }
}

impl KnowledgeStore for InMemoryKnowledgeStore {
    fn load(&self) -> Result<KnowledgeBase, StoreError> {
        if self.corrupt.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt {
                path: PathBuf::from(LOCATION),
                reason: "simulated corruption".to_string(),
            });
        }
        let mut guard = self.persisted.write().map_err(|_| lock_err("load"))?;
        Ok(guard.get_or_insert_with(KnowledgeBase::new).clone())
    }

    fn save(&self, knowledge: &KnowledgeBase) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Persistence {
                path: PathBuf::from(LOCATION),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated write failure"),
            });
        }
        let mut guard = self.persisted.write().map_err(|_| lock_err("save"))?;
        *guard = Some(knowledge.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        let mut guard = self.persisted.write().map_err(|_| lock_err("quarantine"))?;
        *guard = None;
        self.corrupt.store(false, Ordering::SeqCst);
        Ok(None)
    }

    fn location(&self) -> String {
        LOCATION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_initializes_empty() {
        let store = InMemoryKnowledgeStore::new();
        assert!(store.snapshot().unwrap().is_none());
        assert!(store.load().unwrap().is_empty());
        assert!(store.snapshot().unwrap().is_some());
    }

    #[test]
    fn test_failed_save_keeps_previous() {
        let mut kb = KnowledgeBase::new();
        kb.complete_session();
        let store = InMemoryKnowledgeStore::with_knowledge(kb.clone());

        store.set_fail_saves(true);
        let err = store.save(&KnowledgeBase::new()).unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
        assert_eq!(store.snapshot().unwrap(), Some(kb));
        assert_eq!(store.save_count(), 0);

        store.set_fail_saves(false);
        store.save(&KnowledgeBase::new()).unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_corrupt_until_quarantined() {
        let store = InMemoryKnowledgeStore::new();
        store.set_corrupt(true);
        assert!(store.load().unwrap_err().is_corrupt());
        assert!(store.quarantine().unwrap().is_none());
        assert!(store.load().unwrap().is_empty());
    }
}
