//! Shadow registry: live shadow states, injected into the forker.
//!
//! Entries are ephemeral. A process restart drops every registration, and
//! `Full` shadow directories disappear with their storage handles.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::shadow::{ShadowId, ShadowState};

/// One registered shadow. Holding the lock serializes every operation on it.
pub type SharedShadow = Arc<Mutex<ShadowState>>;

pub trait ShadowRegistry: Send + Sync {
    fn insert(&self, id: ShadowId, shadow: SharedShadow);
    fn get(&self, id: &ShadowId) -> Option<SharedShadow>;
    /// Deregister. Returns the entry if it was present.
    fn remove(&self, id: &ShadowId) -> Option<SharedShadow>;
    fn ids(&self) -> Vec<ShadowId>;

    fn len(&self) -> usize {
        self.ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent in-process registry.
#[derive(Default)]
pub struct InMemoryShadowRegistry {
    shadows: DashMap<ShadowId, SharedShadow>,
}

impl InMemoryShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShadowRegistry for InMemoryShadowRegistry {
    fn insert(&self, id: ShadowId, shadow: SharedShadow) {
        self.shadows.insert(id, shadow);
    }

    fn get(&self, id: &ShadowId) -> Option<SharedShadow> {
        self.shadows.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn remove(&self, id: &ShadowId) -> Option<SharedShadow> {
        self.shadows.remove(id).map(|(_, shadow)| shadow)
    }

    fn ids(&self) -> Vec<ShadowId> {
        let mut ids: Vec<ShadowId> = self.shadows.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    fn len(&self) -> usize {
        self.shadows.len()
    }
}
