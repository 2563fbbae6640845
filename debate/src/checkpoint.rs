//! Batch checkpointing — save and resume for interrupted runs.
//!
//! A checkpoint is written only at question boundaries, so it always holds
//! a prefix of terminal records: resume never re-issues a call for a
//! question already fully recorded and never sees a half-written record.
//! Restore goes through integrity validation before the batch trusts it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::turn::DebateRecord;

/// Durable snapshot of batch progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub batch_id: String,
    /// Count of questions with a terminal record (== resume index).
    pub last_completed_question_index: usize,
    pub completed_records: Vec<DebateRecord>,
    pub saved_at: DateTime<Utc>,
}

impl BatchCheckpoint {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(batch_id: &str, completed_records: Vec<DebateRecord>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            batch_id: batch_id.to_string(),
            last_completed_question_index: completed_records.len(),
            completed_records,
            saved_at: Utc::now(),
        }
    }

    /// Validate integrity before resuming. A checkpoint that fails here is
    /// treated as absent (the batch restarts from scratch) rather than
    /// resumed into a corrupted state.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.version > Self::CURRENT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: self.version,
            });
        }
        if self.last_completed_question_index != self.completed_records.len() {
            return Err(CheckpointError::Integrity(format!(
                "index {} does not match {} stored records",
                self.last_completed_question_index,
                self.completed_records.len()
            )));
        }
        if let Some(rec) = self.completed_records.iter().find(|r| !r.is_terminal()) {
            return Err(CheckpointError::Integrity(format!(
                "record for question '{}' is not terminal",
                rec.question_id
            )));
        }
        Ok(())
    }
}

/// Error during checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("checkpoint version mismatch: expected <= {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("checkpoint integrity check failed: {0}")]
    Integrity(String),
}

/// Persistence seam for batch progress. `save` is idempotent and
/// last-write-wins; `load` returns `None` when no checkpoint exists.
pub trait CheckpointStore {
    fn load(&self, batch_id: &str) -> Result<Option<BatchCheckpoint>, CheckpointError>;
    fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), CheckpointError>;
    fn clear(&self, batch_id: &str) -> Result<(), CheckpointError>;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for std::sync::Arc<S> {
    fn load(&self, batch_id: &str) -> Result<Option<BatchCheckpoint>, CheckpointError> {
        (**self).load(batch_id)
    }

    fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), CheckpointError> {
        (**self).save(checkpoint)
    }

    fn clear(&self, batch_id: &str) -> Result<(), CheckpointError> {
        (**self).clear(batch_id)
    }
}

/// File-backed store: one `checkpoint_<batch_id>.json` per batch under a
/// configured directory, written via temp file + rename so a crash mid-save
/// never truncates the previous good checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, batch_id: &str) -> PathBuf {
        // Batch ids come from the CLI; keep the filename shell-safe.
        let safe: String = batch_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("checkpoint_{safe}.json"))
    }

    fn io_err(path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, batch_id: &str) -> Result<Option<BatchCheckpoint>, CheckpointError> {
        let path = self.path_for(batch_id);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(&path, e)),
        };
        let checkpoint: BatchCheckpoint = serde_json::from_str(&json)?;
        checkpoint.validate()?;
        debug!(
            batch_id,
            resume_index = checkpoint.last_completed_question_index,
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        let path = self.path_for(&checkpoint.batch_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&tmp, json).map_err(|e| Self::io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(&path, e))?;
        debug!(
            batch_id = %checkpoint.batch_id,
            completed = checkpoint.last_completed_question_index,
            "checkpoint saved"
        );
        Ok(())
    }

    fn clear(&self, batch_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(batch_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(batch_id, error = %e, "failed to clear checkpoint");
                Err(Self::io_err(&path, e))
            }
        }
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<HashMap<String, BatchCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a checkpoint is currently held for `batch_id`.
    pub fn contains(&self, batch_id: &str) -> bool {
        self.inner
            .lock()
            .map(|m| m.contains_key(batch_id))
            .unwrap_or(false)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, batch_id: &str) -> Result<Option<BatchCheckpoint>, CheckpointError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CheckpointError::Integrity("store mutex poisoned".to_string()))?;
        match map.get(batch_id) {
            Some(cp) => {
                cp.validate()?;
                Ok(Some(cp.clone()))
            }
            None => Ok(None),
        }
    }

    fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), CheckpointError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CheckpointError::Integrity("store mutex poisoned".to_string()))?;
        map.insert(checkpoint.batch_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn clear(&self, batch_id: &str) -> Result<(), CheckpointError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CheckpointError::Integrity("store mutex poisoned".to_string()))?;
        map.remove(batch_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::DebateStatus;

    fn record(id: &str, status: DebateStatus) -> DebateRecord {
        DebateRecord {
            question_id: id.to_string(),
            category: None,
            positions: None,
            turns: vec![],
            judge: None,
            citations_used: vec![],
            status,
            failure: None,
            correct: None,
            elapsed_ms: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let cp = BatchCheckpoint::new(
            "batch-1",
            vec![
                record("q-1", DebateStatus::Complete),
                record("q-2", DebateStatus::Failed),
            ],
        );
        store.save(&cp).unwrap();
        let loaded = store.load("batch-1").unwrap().unwrap();
        assert_eq!(loaded.last_completed_question_index, 2);
        assert_eq!(loaded.completed_records.len(), 2);
        assert_eq!(loaded.completed_records[0].question_id, "q-1");
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("nothing-here").unwrap().is_none());
    }

    #[test]
    fn test_save_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store
            .save(&BatchCheckpoint::new(
                "b",
                vec![record("q-1", DebateStatus::Complete)],
            ))
            .unwrap();
        store
            .save(&BatchCheckpoint::new(
                "b",
                vec![
                    record("q-1", DebateStatus::Complete),
                    record("q-2", DebateStatus::Complete),
                ],
            ))
            .unwrap();
        let loaded = store.load("b").unwrap().unwrap();
        assert_eq!(loaded.last_completed_question_index, 2);
    }

    #[test]
    fn test_clear_removes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store
            .save(&BatchCheckpoint::new(
                "b",
                vec![record("q-1", DebateStatus::Complete)],
            ))
            .unwrap();
        store.clear("b").unwrap();
        assert!(store.load("b").unwrap().is_none());
        // Clearing again is a no-op.
        store.clear("b").unwrap();
    }

    #[test]
    fn test_validate_rejects_future_version() {
        let mut cp = BatchCheckpoint::new("b", vec![]);
        cp.version = BatchCheckpoint::CURRENT_VERSION + 1;
        assert!(matches!(
            cp.validate(),
            Err(CheckpointError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inconsistent_index() {
        let mut cp = BatchCheckpoint::new("b", vec![record("q-1", DebateStatus::Complete)]);
        cp.last_completed_question_index = 5;
        assert!(matches!(cp.validate(), Err(CheckpointError::Integrity(_))));
    }

    #[test]
    fn test_batch_id_sanitized_in_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let cp = BatchCheckpoint::new("oab/2023 exam", vec![]);
        store.save(&cp).unwrap();
        assert!(dir.path().join("checkpoint_oab_2023_exam.json").exists());
        assert!(store.load("oab/2023 exam").unwrap().is_some());
    }

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryCheckpointStore::new();
        let cp = BatchCheckpoint::new("m", vec![record("q-1", DebateStatus::Partial)]);
        store.save(&cp).unwrap();
        assert!(store.contains("m"));
        let loaded = store.load("m").unwrap().unwrap();
        assert_eq!(loaded.completed_records[0].status, DebateStatus::Partial);
        store.clear("m").unwrap();
        assert!(!store.contains("m"));
    }
}
