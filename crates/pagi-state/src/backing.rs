//! The `BackingStore` capability consumed by the shadow forker.
//!
//! The forker only needs two things from live state: a consistent point-in-time
//! copy (`snapshot`) and the ability to apply one change record (`apply`). The
//! store is responsible for making `snapshot` atomic with respect to concurrent
//! `apply` calls on the same source.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::ChangeEntry;
use crate::error::StateError;

/// Sled tree holding the agent's primary state.
pub const STATE_TREE: &str = "state";
/// Ancillary tree: per-agent runtime states.
pub const AGENT_STATES_TREE: &str = "agent_states";
/// Ancillary tree: configuration values.
pub const CONFIGURATION_TREE: &str = "configuration";

/// Raw key → value bytes of one tree. Keys stay bytes so non-UTF-8 keys copy exactly.
pub type TreeRecords = BTreeMap<Vec<u8>, Vec<u8>>;

/// Immutable point-in-time copy of a backing store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub taken_at: DateTime<Utc>,
    /// Location of the durable data this snapshot was taken from, if any.
    pub source: Option<PathBuf>,
    /// Primary state records.
    pub records: TreeRecords,
    /// Ancillary trees (agent states, configuration) keyed by tree name.
    pub ancillary: BTreeMap<String, TreeRecords>,
}

impl SnapshotHandle {
    /// An empty snapshot, used when the source could not be read.
    pub fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len() + self.ancillary.values().map(BTreeMap::len).sum::<usize>()
    }

    /// Decoded JSON value of a primary record.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.records
            .get(key.as_bytes())
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Content digest over every tree, used to prove the snapshot was never mutated.
    pub fn digest(&self) -> String {
        let mut hasher = DefaultHasher::new();
        hash_records(&mut hasher, &self.records);
        for (tree, records) in &self.ancillary {
            tree.hash(&mut hasher);
            hash_records(&mut hasher, records);
        }
        format!("{:016x}", hasher.finish())
    }
}

fn hash_records(hasher: &mut DefaultHasher, records: &TreeRecords) {
    records.len().hash(hasher);
    for (key, value) in records {
        key.hash(hasher);
        value.hash(hasher);
    }
}

/// Digest of a sled tree's current contents. Equal trees have equal digests.
pub fn tree_digest(tree: &sled::Tree) -> Result<String, StateError> {
    let mut hasher = DefaultHasher::new();
    let mut count = 0usize;
    for item in tree.iter() {
        let (key, value) = item?;
        let (key, value): (&[u8], &[u8]) = (&key, &value);
        key.hash(&mut hasher);
        value.hash(&mut hasher);
        count += 1;
    }
    count.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

/// Live state capability supplied to the forker by the composition root.
pub trait BackingStore: Send + Sync {
    /// Consistent point-in-time copy of the store's durable data.
    fn snapshot(&self) -> Result<SnapshotHandle, StateError>;

    /// Apply a single change record.
    fn apply(&self, change: &ChangeEntry) -> Result<(), StateError>;

    /// Read one primary-state value.
    fn read(&self, key: &str) -> Result<Option<Value>, StateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_content_sensitive() {
        let mut a = SnapshotHandle::empty();
        a.records.insert(b"k".to_vec(), b"1".to_vec());
        let mut b = a.clone();
        b.taken_at = Utc::now();
        assert_eq!(a.digest(), b.digest());

        b.records.insert(b"k".to_vec(), b"2".to_vec());
        assert_ne!(a.digest(), b.digest());

        let mut c = a.clone();
        c.ancillary
            .entry(CONFIGURATION_TREE.to_string())
            .or_default()
            .insert(b"mode".to_vec(), b"\"safe\"".to_vec());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(c.record_count(), 2);
    }

    #[test]
    fn test_tree_digest_matches_equal_contents() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let left = db.open_tree("left").unwrap();
        let right = db.open_tree("right").unwrap();
        for tree in [&left, &right] {
            tree.insert("a", b"1".to_vec()).unwrap();
            tree.insert("b", b"2".to_vec()).unwrap();
        }
        assert_eq!(tree_digest(&left).unwrap(), tree_digest(&right).unwrap());
        right.remove("b").unwrap();
        assert_ne!(tree_digest(&left).unwrap(), tree_digest(&right).unwrap());
    }
}
