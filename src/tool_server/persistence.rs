//! File-based operation persistence (§6.4): one JSON file per operation
//! under `operations/<opId>.json`, atomic via write-to-`.tmp`-then-rename.
//!
//! Generalizes the teacher's `RouterConfig::save_to_file`/`load_from_file`
//! pattern (`message_router/config.rs`) from a single config blob to
//! one-file-per-record, made async over `tokio::fs`.

use crate::tool_server::domain_types::{OperationId, OperationRecord};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from reading or writing operation snapshots.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The snapshot directory could not be created.
    #[error("failed to create operations directory: {source}")]
    CreateDir {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing or renaming the snapshot file failed.
    #[error("failed to write snapshot for {operation_id}: {source}")]
    Write {
        /// The operation whose snapshot failed to write.
        operation_id: OperationId,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading an existing snapshot file failed.
    #[error("failed to read snapshot for {operation_id}: {source}")]
    Read {
        /// The operation whose snapshot failed to read.
        operation_id: OperationId,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file was not valid JSON for an [`OperationRecord`].
    #[error("corrupt snapshot for {operation_id}: {source}")]
    Corrupt {
        /// The operation whose snapshot failed to parse.
        operation_id: OperationId,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Listing the operations directory failed.
    #[error("failed to list operations directory: {source}")]
    ListDir {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A directory of one-JSON-file-per-operation snapshots.
pub struct OperationStore {
    operations_dir: PathBuf,
}

impl OperationStore {
    /// Points at `base_dir/operations`; does not create it yet.
    #[must_use]
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            operations_dir: base_dir.as_ref().join("operations"),
        }
    }

    /// Ensures the operations directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::CreateDir`] if directory creation fails.
    pub async fn ensure_dir(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.operations_dir)
            .await
            .map_err(|source| PersistenceError::CreateDir { source })
    }

    fn path_for(&self, id: &OperationId) -> PathBuf {
        self.operations_dir.join(format!("{id}.json"))
    }

    /// Atomically writes `record`'s current state: serialize to
    /// `<opId>.json.tmp`, then rename over `<opId>.json`. The rename is the
    /// durability boundary — a crash before it leaves the previous snapshot
    /// (or nothing) intact, never a half-written file.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Write`] if either step fails.
    pub async fn save(&self, record: &OperationRecord) -> Result<(), PersistenceError> {
        let final_path = self.path_for(&record.id);
        let tmp_path = final_path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record).map_err(|source| PersistenceError::Write {
            operation_id: record.id.clone(),
            source: std::io::Error::other(source),
        })?;
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|source| PersistenceError::Write {
                operation_id: record.id.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|source| PersistenceError::Write {
                operation_id: record.id.clone(),
                source,
            })
    }

    /// Loads a single snapshot by id.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Read`] or [`PersistenceError::Corrupt`].
    pub async fn load(&self, id: &OperationId) -> Result<OperationRecord, PersistenceError> {
        let path = self.path_for(id);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| PersistenceError::Read {
                operation_id: id.clone(),
                source,
            })?;
        serde_json::from_str(&json).map_err(|source| PersistenceError::Corrupt {
            operation_id: id.clone(),
            source,
        })
    }

    /// Loads every snapshot currently on disk, skipping files that fail to
    /// parse (logged by the caller) rather than failing the whole load.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ListDir`] if the directory cannot be read.
    pub async fn load_all(&self) -> Result<Vec<OperationRecord>, PersistenceError> {
        self.ensure_dir().await?;
        let mut entries = tokio::fs::read_dir(&self.operations_dir)
            .await
            .map_err(|source| PersistenceError::ListDir { source })?;
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| PersistenceError::ListDir { source })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(json) = tokio::fs::read_to_string(&path).await {
                if let Ok(record) = serde_json::from_str::<OperationRecord>(&json) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Deletes a snapshot file (purge after the GC grace window).
    pub async fn delete(&self, id: &OperationId) {
        let _ = tokio::fs::remove_file(self.path_for(id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_server::domain_types::OperationRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        let record = OperationRecord::new(OperationId::mint("debug_echo"), "debug_echo");
        store.save(&record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.command, record.command);
    }

    #[tokio::test]
    async fn load_all_finds_every_saved_record() {
        let dir = TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        for _ in 0..3 {
            let record = OperationRecord::new(OperationId::mint("debug_echo"), "debug_echo");
            store.save(&record).await.unwrap();
        }

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_the_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        let record = OperationRecord::new(OperationId::mint("debug_echo"), "debug_echo");
        store.save(&record).await.unwrap();
        store.delete(&record.id).await;

        assert!(store.load(&record.id).await.is_err());
    }

    #[tokio::test]
    async fn save_leaves_no_tmp_file_behind() {
        let dir = TempDir::new().unwrap();
        let store = OperationStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        let record = OperationRecord::new(OperationId::mint("debug_echo"), "debug_echo");
        store.save(&record).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path().join("operations"))
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }
}
