#![allow(dead_code)]

use std::sync::Arc;

use pagi_evolution::{
    BackingStore, ChangeEntry, EvolutionConfig, ShadowStateForker, SledBackingStore, StateError,
    ValidationEngine,
};
use pagi_state::SnapshotHandle;
use serde_json::Value;
use tempfile::TempDir;

pub struct Harness {
    pub store: Arc<SledBackingStore>,
    pub forker: Arc<ShadowStateForker>,
    pub shadow_root: TempDir,
    _live: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let live = tempfile::tempdir().unwrap();
        let store = Arc::new(SledBackingStore::open_path(live.path().join("state")).unwrap());
        let shadow_root = tempfile::tempdir().unwrap();
        let forker = Arc::new(ShadowStateForker::with_store(
            store.clone(),
            config_in(&shadow_root),
        ));
        Self {
            store,
            forker,
            shadow_root,
            _live: live,
        }
    }

    pub fn engine(&self) -> ValidationEngine {
        ValidationEngine::new(Arc::clone(&self.forker))
    }
}

pub fn config_in(root: &TempDir) -> EvolutionConfig {
    EvolutionConfig {
        shadow_root: root.path().to_path_buf(),
        cleanup_timeout_ms: 500,
        ..EvolutionConfig::default()
    }
}

/// Store whose snapshot always fails.
pub struct UnreadableStore;

impl BackingStore for UnreadableStore {
    fn snapshot(&self) -> Result<SnapshotHandle, StateError> {
        Err(StateError::Unavailable("disk offline".to_string()))
    }

    fn apply(&self, _: &ChangeEntry) -> Result<(), StateError> {
        Err(StateError::Unavailable("disk offline".to_string()))
    }

    fn read(&self, _: &str) -> Result<Option<Value>, StateError> {
        Ok(None)
    }
}

/// Sled store that refuses writes to one key.
pub struct LockedKeyStore {
    pub locked: &'static str,
    pub inner: SledBackingStore,
}

impl BackingStore for LockedKeyStore {
    fn snapshot(&self) -> Result<SnapshotHandle, StateError> {
        self.inner.snapshot()
    }

    fn apply(&self, change: &ChangeEntry) -> Result<(), StateError> {
        if change.mutation().key() == self.locked {
            return Err(StateError::Unavailable(format!("{} is locked", self.locked)));
        }
        self.inner.apply(change)
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StateError> {
        self.inner.read(key)
    }
}
