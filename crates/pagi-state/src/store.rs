//! Sled-backed live state: one tree for primary state plus ancillary trees.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;
use sled::Db;
use tracing::debug;

use crate::backing::{
    BackingStore, SnapshotHandle, TreeRecords, AGENT_STATES_TREE, CONFIGURATION_TREE, STATE_TREE,
};
use crate::change::ChangeEntry;
use crate::error::StateError;

const DEFAULT_STORE_PATH: &str = "./data/pagi_state";

/// Live agent state in Sled.
///
/// `snapshot` holds the write side of an internal gate while it copies, and every
/// `apply` holds the read side, so a snapshot never observes half of a merge.
pub struct SledBackingStore {
    db: Db,
    path: Option<PathBuf>,
    gate: RwLock<()>,
}

impl SledBackingStore {
    /// Opens or creates the store at `./data/pagi_state`.
    pub fn new() -> Result<Self, StateError> {
        Self::open_path(DEFAULT_STORE_PATH)
    }

    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let db = sled::open(path.as_ref())?;
        Ok(Self {
            db,
            path: Some(path.as_ref().to_path_buf()),
            gate: RwLock::new(()),
        })
    }

    /// In-memory store that disappears on drop.
    pub fn temporary() -> Result<Self, StateError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            path: None,
            gate: RwLock::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes a primary-state value directly (bootstrap and tests; proposals go through `apply`).
    pub fn put(&self, key: &str, value: &Value) -> Result<(), StateError> {
        self.put_in(STATE_TREE, key, value)
    }

    /// Writes into an ancillary tree such as `agent_states` or `configuration`.
    pub fn put_ancillary(&self, tree: &str, key: &str, value: &Value) -> Result<(), StateError> {
        self.put_in(tree, key, value)
    }

    fn put_in(&self, tree: &str, key: &str, value: &Value) -> Result<(), StateError> {
        let _gate = self
            .gate
            .read()
            .map_err(|e| StateError::Unavailable(format!("store gate: {}", e)))?;
        self.db
            .open_tree(tree)?
            .insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// All decoded primary-state entries, ordered by key. Non-UTF-8 keys and
    /// undecodable values are skipped.
    pub fn scan(&self) -> Result<Vec<(String, Value)>, StateError> {
        let mut out = Vec::new();
        for item in self.db.open_tree(STATE_TREE)?.iter() {
            let (key, value) = item?;
            let (Ok(key), Ok(decoded)) = (
                std::str::from_utf8(&key),
                serde_json::from_slice::<Value>(&value),
            ) else {
                continue;
            };
            out.push((key.to_string(), decoded));
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StateError> {
        self.db.flush()?;
        Ok(())
    }

    fn copy_tree(&self, name: &str) -> Result<TreeRecords, StateError> {
        let mut records = TreeRecords::new();
        for item in self.db.open_tree(name)?.iter() {
            let (key, value) = item?;
            records.insert(key.to_vec(), value.to_vec());
        }
        Ok(records)
    }
}

impl BackingStore for SledBackingStore {
    fn snapshot(&self) -> Result<SnapshotHandle, StateError> {
        let _gate = self
            .gate
            .write()
            .map_err(|e| StateError::Unavailable(format!("store gate: {}", e)))?;
        let records = self.copy_tree(STATE_TREE)?;
        let mut ancillary = std::collections::BTreeMap::new();
        for tree in [AGENT_STATES_TREE, CONFIGURATION_TREE] {
            ancillary.insert(tree.to_string(), self.copy_tree(tree)?);
        }
        let handle = SnapshotHandle {
            taken_at: Utc::now(),
            source: self.path.clone(),
            records,
            ancillary,
        };
        debug!(
            target: "pagi::state",
            records = handle.record_count(),
            "Snapshot captured"
        );
        Ok(handle)
    }

    fn apply(&self, change: &ChangeEntry) -> Result<(), StateError> {
        let _gate = self
            .gate
            .read()
            .map_err(|e| StateError::Unavailable(format!("store gate: {}", e)))?;
        let mutation = change.mutation();
        mutation.apply_to(&self.db.open_tree(STATE_TREE)?)?;
        debug!(
            target: "pagi::state",
            change_id = change.id,
            change_type = %change.change_type,
            key = mutation.key(),
            "Change applied to live state"
        );
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StateError> {
        match self.db.open_tree(STATE_TREE)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
