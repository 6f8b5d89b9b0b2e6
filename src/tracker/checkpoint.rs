//! Checkpoint of the poll cursor and user registry.
//!
//! Epistemic foundation:
//! - K_i: State is persisted to disk atomically (write-then-rename)
//! - B_i: Checkpoint file may not exist → Option
//! - I^B: Crash during write → backup file provides recovery

use crate::models::{Ps360Error, Result};
use crate::tracker::UserRegistry;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything needed to resume tracking after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerState {
    /// Start of the next browse window
    pub cursor: DateTime<FixedOffset>,
    pub registry: UserRegistry,
    pub updated_at: DateTime<Utc>,
}

/// Persists `TrackerState` to a JSON file.
pub struct CheckpointManager {
    /// Path to main checkpoint file
    path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
    /// Path written before the atomic rename
    temp_path: PathBuf,
}

impl CheckpointManager {
    /// Create a manager, creating the parent directory if needed.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| Ps360Error::io("creating checkpoint dir", e))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            backup_path: path.with_extension("backup.json"),
            temp_path: path.with_extension("tmp.json"),
        })
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the checkpoint, falling back to the backup when the primary
    /// file is unreadable. None when neither exists.
    pub fn load(&self) -> Result<Option<TrackerState>> {
        if !self.exists() {
            return Ok(None);
        }

        match read_state(&self.path) {
            Ok(state) => {
                info!(
                    cursor = %state.cursor,
                    users = state.registry.len(),
                    pending = state.registry.pending_count(),
                    "Resuming from checkpoint"
                );
                Ok(Some(state))
            }
            Err(e) if self.backup_path.exists() => {
                warn!(error = %e, "Checkpoint unreadable, using backup");
                read_state(&self.backup_path).map(Some)
            }
            Err(e) => Err(e),
        }
    }

    /// Save checkpoint to disk (atomic write).
    pub fn save(&self, state: &TrackerState) -> Result<()> {
        // Backup existing checkpoint
        if self.path.exists() {
            fs::copy(&self.path, &self.backup_path)
                .map_err(|e| Ps360Error::io("backing up checkpoint", e))?;
        }

        // Write to temp file
        let file = File::create(&self.temp_path)
            .map_err(|e| Ps360Error::io("creating temp checkpoint", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)
            .map_err(|e| Ps360Error::Internal(format!("Serializing checkpoint: {e}")))?;
        writer
            .flush()
            .map_err(|e| Ps360Error::io("flushing temp checkpoint", e))?;

        // Atomic rename
        fs::rename(&self.temp_path, &self.path)
            .map_err(|e| Ps360Error::io("renaming checkpoint", e))?;

        debug!("Checkpoint saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_state(path: &Path) -> Result<TrackerState> {
    let file = File::open(path).map_err(|e| Ps360Error::io("opening checkpoint", e))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| Ps360Error::ParseError(format!("Invalid checkpoint: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportEvent, parse_xs_datetime};
    use tempfile::TempDir;

    fn sample_state() -> TrackerState {
        let mut registry = UserRegistry::new();
        registry.observe(&ReportEvent {
            event_type: "Sign".into(),
            event_time: parse_xs_datetime("2024-05-01T10:00:00+12:00").unwrap(),
            workstation: "WS1".into(),
            additional_info: "final".into(),
            account_id: 9,
            account_name: "Doe, J".into(),
        });
        TrackerState {
            cursor: parse_xs_datetime("2024-05-01T11:00:00+12:00").unwrap(),
            registry,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_checkpoint_loads_none() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(&temp_dir.path().join("state.json")).unwrap();
        assert!(manager.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_resume() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");
        let manager = CheckpointManager::new(&path).unwrap();

        let state = sample_state();
        manager.save(&state).unwrap();
        manager.save(&state).unwrap();
        assert!(path.with_extension("backup.json").exists());
        assert!(!path.with_extension("tmp.json").exists());

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.cursor, state.cursor);
        assert_eq!(loaded.registry.get(9), state.registry.get(9));
        assert_eq!(loaded.registry.pending_count(), 1);
    }

    #[test]
    fn test_corrupt_checkpoint_falls_back_to_backup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        let manager = CheckpointManager::new(&path).unwrap();

        let state = sample_state();
        manager.save(&state).unwrap();
        manager.save(&state).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.cursor, state.cursor);
    }

    #[test]
    fn test_corrupt_checkpoint_without_backup_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "garbage").unwrap();
        let manager = CheckpointManager::new(&path).unwrap();
        assert!(matches!(manager.load(), Err(Ps360Error::ParseError(_))));
    }
}
