//! File-based checkpoint for resume capability.
//!
//! A [`ProgressTracker`] exclusively owns one checkpoint file for its whole
//! lifetime. It holds an OS lock on `<checkpoint>.lock`, so a second run
//! against the same location is rejected instead of racing this one. The
//! lock is released by the OS when the process exits, so a crashed run can
//! be resumed.

use crate::config::MigrationMode;
use crate::error::{MigrateError, Result};
use crate::orchestrator::Phase;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Tracker shared between concurrent table transfers. Every checkpoint
/// write goes through this one mutex.
pub type SharedTracker = Arc<tokio::sync::Mutex<ProgressTracker>>;

/// Persisted migration progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    /// Mode of the run that created the checkpoint.
    pub mode: MigrationMode,

    /// Fully transferred tables, in completion order, without duplicates.
    pub completed_tables: Vec<String>,

    /// Table whose batch was committed most recently.
    pub current_table: Option<String>,

    /// Committed row offset within `current_table`.
    pub current_offset: u64,

    /// Committed row offset of every table still in flight.
    #[serde(default)]
    pub table_offsets: BTreeMap<String, u64>,

    /// Failed object name -> error message.
    #[serde(default)]
    pub failed_objects: BTreeMap<String, String>,

    #[serde(default)]
    pub completed_phases: Vec<Phase>,

    /// Keys of schema objects already created on the target.
    #[serde(default)]
    pub created_objects: Vec<String>,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,

    /// HMAC-SHA256 over the serialized checkpoint (excluding this field),
    /// keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl BatchCheckpoint {
    pub fn new(mode: MigrationMode, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            mode,
            completed_tables: Vec::new(),
            current_table: None,
            current_offset: 0,
            table_offsets: BTreeMap::new(),
            failed_objects: BTreeMap::new(),
            completed_phases: Vec::new(),
            created_objects: Vec::new(),
            config_hash: config_hash.into(),
            start_time: now,
            last_update: now,
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;
        let content = serde_json::to_string(&unsigned)?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::Config(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Structural checks on a checkpoint read from disk.
    fn check_consistency(&self) -> Result<()> {
        for (i, table) in self.completed_tables.iter().enumerate() {
            if self.completed_tables[..i].contains(table) {
                return Err(MigrateError::CorruptState(format!(
                    "table {} is listed as completed twice",
                    table
                )));
            }
            if self.table_offsets.contains_key(table) {
                return Err(MigrateError::CorruptState(format!(
                    "table {} is both completed and in progress",
                    table
                )));
            }
        }
        if let Some(current) = &self.current_table {
            let recorded = self.table_offsets.get(current).copied();
            let completed = self.completed_tables.contains(current);
            if !completed && recorded != Some(self.current_offset) {
                return Err(MigrateError::CorruptState(format!(
                    "current table {} has offset {} but {:?} is recorded",
                    current, self.current_offset, recorded
                )));
            }
        }
        Ok(())
    }
}

/// Exclusive lock on `<checkpoint>.lock`, held until drop.
#[derive(Debug)]
struct CheckpointLock {
    path: PathBuf,
    file: File,
}

impl CheckpointLock {
    fn acquire(checkpoint: &Path) -> Result<Self> {
        let mut name = checkpoint.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(MigrateError::AlreadyInProgress(format!(
                    "another run holds the lock on {}",
                    path.display()
                )))
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }
        Ok(Self { path, file })
    }

    /// Unlock and close the lock file, returning its path.
    fn release(self) -> PathBuf {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        drop(self.file);
        self.path
    }
}

/// Owner of one checkpoint file.
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    checkpoint: BatchCheckpoint,
    lock: CheckpointLock,
}

impl ProgressTracker {
    /// Lock the checkpoint location and start or resume a run.
    ///
    /// Without `resume`, an existing checkpoint is an error. With `resume`,
    /// the existing checkpoint is restored and must match `config_hash`; if
    /// none exists a fresh one is started.
    pub fn create(
        path: impl AsRef<Path>,
        mode: MigrationMode,
        config_hash: &str,
        resume: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = CheckpointLock::acquire(&path)?;

        if path.exists() {
            if !resume {
                return Err(MigrateError::AlreadyInProgress(format!(
                    "checkpoint {} exists; resume the run or delete the file",
                    path.display()
                )));
            }
            let checkpoint = Self::restore(&path)?;
            if checkpoint.config_hash != config_hash {
                return Err(MigrateError::ConfigChanged);
            }
            info!(
                "Resuming from checkpoint {} ({} tables completed, {} in flight)",
                path.display(),
                checkpoint.completed_tables.len(),
                checkpoint.table_offsets.len()
            );
            return Ok(Self {
                path,
                checkpoint,
                lock,
            });
        }

        if resume {
            warn!("No checkpoint at {}, starting a fresh run", path.display());
        }
        let mut tracker = Self {
            path,
            checkpoint: BatchCheckpoint::new(mode, config_hash),
            lock,
        };
        tracker.persist()?;
        Ok(tracker)
    }

    /// Read and verify a persisted checkpoint.
    pub fn restore(path: impl AsRef<Path>) -> Result<BatchCheckpoint> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let checkpoint: BatchCheckpoint = serde_json::from_str(&content).map_err(|e| {
            MigrateError::CorruptState(format!("{} is not a valid checkpoint: {}", path.display(), e))
        })?;

        match &checkpoint.hmac {
            Some(stored) => {
                if stored != &checkpoint.compute_hmac()? {
                    return Err(MigrateError::CorruptState(format!(
                        "{} failed its integrity check (HMAC mismatch)",
                        path.display()
                    )));
                }
            }
            None => {
                warn!(
                    "Checkpoint {} has no HMAC signature, integrity cannot be verified",
                    path.display()
                );
            }
        }

        checkpoint.check_consistency()?;
        Ok(checkpoint)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint(&self) -> &BatchCheckpoint {
        &self.checkpoint
    }

    pub fn mode(&self) -> MigrationMode {
        self.checkpoint.mode
    }

    pub fn is_completed(&self, table: &str) -> bool {
        self.checkpoint.completed_tables.iter().any(|t| t == table)
    }

    /// Rows of `table` already committed on the target.
    pub fn resume_offset(&self, table: &str) -> u64 {
        self.checkpoint.table_offsets.get(table).copied().unwrap_or(0)
    }

    /// Record a committed batch. Call only after the commit succeeded.
    pub fn mark_table_in_progress(&mut self, table: &str, offset: u64) {
        self.checkpoint
            .table_offsets
            .insert(table.to_string(), offset);
        self.checkpoint.current_table = Some(table.to_string());
        self.checkpoint.current_offset = offset;
        self.touch();
    }

    /// Record a fully transferred table and drop its offset. Idempotent.
    pub fn mark_table_completed(&mut self, table: &str) {
        if !self.is_completed(table) {
            self.checkpoint.completed_tables.push(table.to_string());
        }
        self.checkpoint.table_offsets.remove(table);
        self.checkpoint.failed_objects.remove(table);
        if self.checkpoint.current_table.as_deref() == Some(table) {
            self.checkpoint.current_table = None;
            self.checkpoint.current_offset = 0;
        }
        self.touch();
    }

    pub fn mark_object_failed(&mut self, name: &str, message: &str) {
        self.checkpoint
            .failed_objects
            .insert(name.to_string(), message.to_string());
        self.touch();
    }

    /// Forget an earlier failure, e.g. when a retry on resume succeeds.
    pub fn clear_failure(&mut self, name: &str) {
        if self.checkpoint.failed_objects.remove(name).is_some() {
            self.touch();
        }
    }

    pub fn failed_objects(&self) -> &BTreeMap<String, String> {
        &self.checkpoint.failed_objects
    }

    pub fn mark_phase_completed(&mut self, phase: Phase) {
        if !self.is_phase_completed(phase) {
            self.checkpoint.completed_phases.push(phase);
            self.touch();
        }
    }

    pub fn is_phase_completed(&self, phase: Phase) -> bool {
        self.checkpoint.completed_phases.contains(&phase)
    }

    pub fn mark_object_created(&mut self, key: &str) {
        if !self.is_object_created(key) {
            self.checkpoint.created_objects.push(key.to_string());
            self.touch();
        }
    }

    pub fn is_object_created(&self, key: &str) -> bool {
        self.checkpoint.created_objects.iter().any(|k| k == key)
    }

    fn touch(&mut self) {
        self.checkpoint.last_update = Utc::now();
    }

    /// Write the checkpoint: temp file, fsync, then rename over the old one,
    /// so a reader sees either the previous or the new state.
    pub fn persist(&mut self) -> Result<()> {
        self.checkpoint.hmac = Some(self.checkpoint.compute_hmac()?);
        let content = serde_json::to_string_pretty(&self.checkpoint)?;

        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;
        debug!("Checkpoint persisted to {}", self.path.display());
        Ok(())
    }

    /// Remove the checkpoint after a fully successful run.
    pub fn finalize(self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        info!("Checkpoint {} removed", self.path.display());

        let lock_path = self.lock.release();
        if let Err(e) = std::fs::remove_file(&lock_path) {
            warn!("Failed to remove lock file {}: {}", lock_path.display(), e);
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedTracker {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}
