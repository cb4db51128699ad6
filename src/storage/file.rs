//! JSON file backend.
//!
//! The knowledge base lives in a single human-inspectable JSON document.
//! Saves use write-to-temp-then-rename so a crash mid-write never leaves a
//! half-written store: readers see either the old or the new document.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::LearningConfig;
use crate::knowledge::KnowledgeBase;
use crate::storage::document::{decode_document, encode_document};
use crate::storage::traits::{KnowledgeStore, StoreError};

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Knowledge store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    path: PathBuf,
}

impl JsonFileStore {
    /// Opens (or prepares) the store inside `dir`.
    ///
    /// Creates the directory when missing and removes a temp file left
    /// behind by an interrupted save. The store file itself is created on
    /// the first `load`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unreadable` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, config: &LearningConfig) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Unreadable {
            path: dir.clone(),
            source,
        })?;

        let store = Self {
            path: dir.join(config.store_file.trim()),
            dir,
        };

        let temp = store.temp_path();
        if temp.is_file() {
            debug!(path = %temp.display(), "removing stale temp file");
            // Best-effort: a leftover temp file is never read.
            let _ = fs::remove_file(&temp);
        }

        Ok(store)
    }

    /// Path of the persisted document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the next save is staged at.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        sibling(&self.path, ".tmp")
    }

    /// Writes the knowledge base to the temp file and fsyncs it.
    ///
    /// Nothing is visible at [`path`](Self::path) until the returned
    /// [`StagedSave`] is committed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the temp file cannot be written.
    pub fn stage(&self, knowledge: &KnowledgeBase) -> Result<StagedSave, StoreError> {
        let bytes = encode_document(knowledge)?;
        let temp_path = self.temp_path();
        let persist = |source: io::Error| StoreError::Persistence {
            path: temp_path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(persist)?;

        let staged = StagedSave {
            temp_path: Some(temp_path.clone()),
            final_path: self.path.clone(),
        };

        file.write_all(&bytes).map_err(persist)?;
        file.flush().map_err(persist)?;
        file.sync_all().map_err(persist)?;

        Ok(staged)
    }
}

impl KnowledgeStore for JsonFileStore {
    fn load(&self) -> Result<KnowledgeBase, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let knowledge = decode_document(&self.path, &bytes)?;
                debug!(
                    path = %self.path.display(),
                    corrections = knowledge.corrections().len(),
                    rules = knowledge.rules().len(),
                    "loaded knowledge base"
                );
                Ok(knowledge)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "initializing empty knowledge base");
                let knowledge = KnowledgeBase::new();
                self.save(&knowledge)?;
                Ok(knowledge)
            }
            Err(source) => Err(StoreError::Unreadable {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, knowledge: &KnowledgeBase) -> Result<(), StoreError> {
        self.stage(knowledge)?.commit()?;
        info!(
            path = %self.path.display(),
            corrections = knowledge.corrections().len(),
            rules = knowledge.rules().len(),
            "saved knowledge base"
        );
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = sibling(&self.path, &format!(".corrupt-{stamp}"));
        fs::rename(&self.path, &target).map_err(|source| StoreError::Persistence {
            path: target.clone(),
            source,
        })?;
        warn!(
            from = %self.path.display(),
            to = %target.display(),
            "quarantined unreadable knowledge base"
        );
        Ok(Some(target))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fully written, fsynced, not yet visible save.
///
/// [`commit`](Self::commit) atomically renames the temp file over the
/// store. Dropping without committing removes the temp file and leaves the
/// store untouched, which is exactly what a crash before the rename does.
#[derive(Debug)]
pub struct StagedSave {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
}

impl StagedSave {
    /// Path of the staged temp file.
    #[must_use]
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_path.as_deref()
    }

    /// Atomically replaces the store with the staged document.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the rename fails; the previous
    /// store content is then unchanged.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let Some(temp_path) = self.temp_path.take() else {
            return Err(StoreError::Backend("staged save already consumed".to_string()));
        };
        if let Err(source) = fs::rename(&temp_path, &self.final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Persistence {
                path: self.final_path.clone(),
                source,
            });
        }
        Ok(())
    }
}

impl Drop for StagedSave {
    fn drop(&mut self) {
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.is_file() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}
