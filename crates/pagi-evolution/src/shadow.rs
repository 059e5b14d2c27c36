//! Shadow states: isolated, disposable copies of live state.
//!
//! ## Lifecycle
//!
//! ```text
//! CREATED → (N× logging) → VALIDATING → PASSED → MERGED → CLEANED
//!                                     → FAILED → DISCARDED → CLEANED
//! ```
//!
//! `CLEANED` is represented by absence from the registry. The snapshot captured at
//! creation sits behind an `Arc` and is never handed out mutably; only the change
//! log grows.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pagi_state::{
    ChangeEntry, EvolutionConfig, SnapshotHandle, StateError, TreeRecords, STATE_TREE,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::EvolutionError;

// ---------------------------------------------------------------------------
// Identity & configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShadowId(Uuid);

impl ShadowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ShadowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShadowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shadow_{}", self.0.simple())
    }
}

/// Where a shadow's private copy lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Durable copy in a private directory under the shadow root.
    #[default]
    Full,
    /// Temporary in-memory Sled database.
    InMemory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryProtection {
    #[default]
    Standard,
    /// Re-verify the snapshot digest before rollback tests and merges.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowStateConfig {
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    #[serde(default)]
    pub memory_protection: MemoryProtection,
    /// Apply logged changes to the shadow's private store as they are logged.
    #[serde(default = "default_true")]
    pub experiment_mode: bool,
    #[serde(default = "default_true")]
    pub rollback_capability: bool,
    /// Only merge once the shadow's own validation passed for the report's proposal.
    #[serde(default = "default_true")]
    pub validation_required: bool,
    #[serde(default = "default_max_duration_hours")]
    pub max_duration_hours: f64,
    /// Let the expiry sweeper force-discard this shadow once it is stale.
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_duration_hours() -> f64 {
    24.0
}

impl Default for ShadowStateConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::Full,
            memory_protection: MemoryProtection::Standard,
            experiment_mode: true,
            rollback_capability: true,
            validation_required: true,
            max_duration_hours: default_max_duration_hours(),
            auto_cleanup: true,
        }
    }
}

impl ShadowStateConfig {
    pub fn from_config(config: &EvolutionConfig) -> Self {
        Self {
            max_duration_hours: config.default_max_duration_hours,
            ..Self::default()
        }
    }

    /// In-memory shadow, used for short-lived probes.
    pub fn in_memory() -> Self {
        Self {
            isolation_level: IsolationLevel::InMemory,
            ..Self::default()
        }
    }

    pub fn max_duration(&self) -> chrono::Duration {
        let hours = if self.max_duration_hours.is_finite() {
            self.max_duration_hours.max(0.0)
        } else {
            default_max_duration_hours()
        };
        chrono::Duration::milliseconds((hours * 3_600_000.0) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowPhase {
    Created,
    Validating,
    Passed,
    Failed,
    Merged,
    Discarded,
}

impl ShadowPhase {
    /// Merged and discarded shadows only await cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShadowPhase::Merged | ShadowPhase::Discarded)
    }
}

// ---------------------------------------------------------------------------
// Private storage
// ---------------------------------------------------------------------------

/// The shadow's private Sled copy. Dropping it releases the database and removes the directory.
pub(crate) struct ShadowStorage {
    db: sled::Db,
    dir: Option<TempDir>,
}

impl ShadowStorage {
    /// Copy a snapshot into a fresh private database.
    pub(crate) fn materialize(
        isolation: IsolationLevel,
        shadow_root: &Path,
        snapshot: &SnapshotHandle,
    ) -> Result<Self, StateError> {
        let storage = match isolation {
            IsolationLevel::Full => {
                std::fs::create_dir_all(shadow_root)?;
                let dir = tempfile::Builder::new()
                    .prefix("shadow_")
                    .tempdir_in(shadow_root)?;
                let db = sled::open(dir.path().join("db"))?;
                Self { db, dir: Some(dir) }
            }
            IsolationLevel::InMemory => Self::minimal()?,
        };
        copy_records(&storage.db.open_tree(STATE_TREE)?, &snapshot.records)?;
        for (tree, records) in &snapshot.ancillary {
            copy_records(&storage.db.open_tree(tree)?, records)?;
        }
        if storage.dir.is_some() {
            storage.db.flush()?;
        }
        Ok(storage)
    }

    /// Empty in-memory database for degraded environments.
    pub(crate) fn minimal() -> Result<Self, StateError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, dir: None })
    }

    pub(crate) fn db(&self) -> &sled::Db {
        &self.db
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Release the database and remove the private directory.
    pub(crate) fn release(self) -> std::io::Result<()> {
        let Self { db, dir } = self;
        drop(db);
        match dir {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

fn copy_records(tree: &sled::Tree, records: &TreeRecords) -> Result<(), StateError> {
    let mut batch = sled::Batch::default();
    for (key, value) in records {
        batch.insert(key.as_slice(), value.as_slice());
    }
    tree.apply_batch(batch)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Shadow state
// ---------------------------------------------------------------------------

pub struct ShadowState {
    id: ShadowId,
    created_at: DateTime<Utc>,
    config: ShadowStateConfig,
    snapshot: Arc<SnapshotHandle>,
    snapshot_digest: String,
    storage: Option<ShadowStorage>,
    log: Vec<ChangeEntry>,
    next_change_id: u64,
    pub(crate) validation_status: ValidationStatus,
    pub(crate) phase: ShadowPhase,
    /// Proposal whose report produced the current verdict.
    pub(crate) validated_change: Option<String>,
    degraded: Option<String>,
}

impl ShadowState {
    pub(crate) fn new(
        config: ShadowStateConfig,
        snapshot: SnapshotHandle,
        storage: ShadowStorage,
        degraded: Option<String>,
    ) -> Self {
        let snapshot_digest = snapshot.digest();
        Self {
            id: ShadowId::new(),
            created_at: Utc::now(),
            config,
            snapshot: Arc::new(snapshot),
            snapshot_digest,
            storage: Some(storage),
            log: Vec::new(),
            next_change_id: 1,
            validation_status: ValidationStatus::Pending,
            phase: ShadowPhase::Created,
            validated_change: None,
            degraded,
        }
    }

    pub fn id(&self) -> ShadowId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &ShadowStateConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &SnapshotHandle {
        &self.snapshot
    }

    pub fn changes(&self) -> &[ChangeEntry] {
        &self.log
    }

    pub fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }

    pub fn phase(&self) -> ShadowPhase {
        self.phase
    }

    pub fn degraded(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub fn validated_change(&self) -> Option<&str> {
        self.validated_change.as_deref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.config.max_duration()
    }

    /// True while the snapshot still hashes to the digest taken at creation.
    pub fn snapshot_intact(&self) -> bool {
        self.snapshot.digest() == self.snapshot_digest
    }

    /// Allocate the next change id without logging the entry yet.
    pub(crate) fn next_entry(&mut self, change_type: &str, data: Value) -> ChangeEntry {
        let entry = ChangeEntry::new(self.next_change_id, change_type, data);
        self.next_change_id += 1;
        entry
    }

    /// Log an entry. A new change invalidates any previous verdict on this shadow.
    pub(crate) fn push(&mut self, entry: ChangeEntry) {
        self.log.push(entry);
        if matches!(self.phase, ShadowPhase::Passed | ShadowPhase::Failed) {
            self.phase = ShadowPhase::Created;
            self.validation_status = ValidationStatus::Pending;
            self.validated_change = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn append(&mut self, change_type: &str, data: Value) -> ChangeEntry {
        let entry = self.next_entry(change_type, data);
        self.push(entry.clone());
        entry
    }

    pub(crate) fn shared_snapshot(&self) -> Arc<SnapshotHandle> {
        Arc::clone(&self.snapshot)
    }

    pub(crate) fn state_tree(&self) -> Result<sled::Tree, EvolutionError> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            EvolutionError::InvalidState(format!("storage of {} already released", self.id))
        })?;
        Ok(storage.db().open_tree(STATE_TREE)?)
    }

    pub(crate) fn storage_db(&self) -> Option<sled::Db> {
        self.storage.as_ref().map(|s| s.db().clone())
    }

    pub(crate) fn take_storage(&mut self) -> Option<ShadowStorage> {
        self.storage.take()
    }

    pub fn handle(&self) -> EnvironmentHandle {
        EnvironmentHandle {
            id: self.id,
            directory: self
                .storage
                .as_ref()
                .and_then(ShadowStorage::path)
                .map(Path::to_path_buf),
            db: self.storage_db(),
            config: self.config.clone(),
            created_at: self.created_at,
            snapshot_taken_at: self.snapshot.taken_at,
            validation_status: self.validation_status,
            phase: self.phase,
            validated_change: self.validated_change.clone(),
            change_count: self.log.len(),
            degraded: self.degraded.clone(),
        }
    }
}

/// Read-only view of a shadow environment.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    pub id: ShadowId,
    /// Private directory (`None` for in-memory and degraded shadows).
    pub directory: Option<PathBuf>,
    pub db: Option<sled::Db>,
    pub config: ShadowStateConfig,
    pub created_at: DateTime<Utc>,
    pub snapshot_taken_at: DateTime<Utc>,
    pub validation_status: ValidationStatus,
    pub phase: ShadowPhase,
    pub validated_change: Option<String>,
    pub change_count: usize,
    /// Set when the environment runs on a minimal store (`SnapshotDegraded`).
    pub degraded: Option<String>,
}

impl EnvironmentHandle {
    /// Read a value from the shadow's private copy of primary state.
    pub fn read(&self, key: &str) -> Result<Option<Value>, EvolutionError> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        match db.open_tree(STATE_TREE)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(StateError::from)?,
            )),
            None => Ok(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}
