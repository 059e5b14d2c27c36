//! Shadow-state forker: create, log into, merge, discard and clean up shadows.
//!
//! The live [`BackingStore`] is only ever touched twice: once to snapshot it when
//! a shadow is created, and once per logged change when an approved shadow is
//! merged. Everything in between happens against the shadow's private copy.
//!
//! Snapshot copies, rollback probes and merge application run on the blocking
//! pool. Every operation on one shadow holds that shadow's lock, so at most one
//! validation, merge or cleanup is in flight per shadow while distinct shadows
//! proceed independently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pagi_state::{
    tree_digest, BackingStore, ChangeEntry, EvolutionConfig, SnapshotHandle, StateError,
    ValidationReport,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EvolutionError;
use crate::merge::{CleanupReport, Insight, MergeCoordinator, MergeResult};
use crate::registry::{InMemoryShadowRegistry, ShadowRegistry, SharedShadow};
use crate::shadow::{
    EnvironmentHandle, MemoryProtection, ShadowId, ShadowPhase, ShadowState, ShadowStateConfig,
    ShadowStorage, ValidationStatus,
};

/// Scratch tree used by rollback probes inside a shadow's private database.
const PROBE_TREE: &str = "rollback_probe";

pub struct ShadowStateForker {
    store: Arc<dyn BackingStore>,
    registry: Arc<dyn ShadowRegistry>,
    config: EvolutionConfig,
}

impl ShadowStateForker {
    pub fn new(
        store: Arc<dyn BackingStore>,
        registry: Arc<dyn ShadowRegistry>,
        config: EvolutionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config: config.normalized(),
        }
    }

    /// Forker with a fresh in-process registry.
    pub fn with_store(store: Arc<dyn BackingStore>, config: EvolutionConfig) -> Self {
        Self::new(store, Arc::new(InMemoryShadowRegistry::new()), config)
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Default shadow configuration for this forker's settings.
    pub fn default_shadow_config(&self) -> ShadowStateConfig {
        ShadowStateConfig::from_config(&self.config)
    }

    // ---- Creation & inspection ----

    /// Snapshot live state into a new isolated shadow.
    ///
    /// A failed snapshot or copy does not fail creation: the shadow runs on a
    /// minimal empty store and carries a degradation note.
    pub async fn create_isolated_environment(
        &self,
        config: ShadowStateConfig,
    ) -> Result<ShadowId, EvolutionError> {
        let store = Arc::clone(&self.store);
        let root = self.config.shadow_root.clone();
        let isolation = config.isolation_level;

        let (snapshot, storage, degraded) = tokio::task::spawn_blocking(
            move || -> Result<(SnapshotHandle, ShadowStorage, Option<String>), StateError> {
                let (snapshot, mut degraded) = match store.snapshot() {
                    Ok(snapshot) => (snapshot, None),
                    Err(e) => (
                        SnapshotHandle::empty(),
                        Some(format!("snapshot of live state failed: {}", e)),
                    ),
                };
                let storage = match ShadowStorage::materialize(isolation, &root, &snapshot) {
                    Ok(storage) => storage,
                    Err(e) => {
                        let note = format!("private copy could not be created: {}", e);
                        degraded = Some(match degraded {
                            Some(previous) => format!("{}; {}", previous, note),
                            None => note,
                        });
                        ShadowStorage::minimal()?
                    }
                };
                Ok((snapshot, storage, degraded))
            },
        )
        .await??;

        let records = snapshot.record_count();
        let state = ShadowState::new(config, snapshot, storage, degraded);
        let id = state.id();
        if let Some(note) = state.degraded() {
            warn!(
                target: "pagi::shadow",
                shadow_id = %id,
                error = %EvolutionError::SnapshotDegraded(note.to_string()),
                "Shadow environment created on a minimal store"
            );
        }
        info!(
            target: "pagi::shadow",
            shadow_id = %id,
            isolation = ?state.config().isolation_level,
            records,
            "Shadow environment created"
        );
        self.registry.insert(id, Arc::new(Mutex::new(state)));
        Ok(id)
    }

    /// Handle to a registered shadow, or `None` once it is cleaned up.
    pub async fn get_shadow_environment(&self, id: ShadowId) -> Option<EnvironmentHandle> {
        let shadow = self.registry.get(&id)?;
        let state = shadow.lock().await;
        Some(state.handle())
    }

    pub fn active_shadows(&self) -> Vec<ShadowId> {
        self.registry.ids()
    }

    // ---- Logging ----

    /// Append a change to a shadow's log.
    ///
    /// In experiment mode the change is also applied to the shadow's private store.
    pub async fn log_shadow_change(
        &self,
        id: ShadowId,
        change_type: &str,
        data: Value,
    ) -> Result<ChangeEntry, EvolutionError> {
        let shadow = self.lookup(id)?;
        let mut state = shadow.lock().await;
        ensure_mutable(&state, Utc::now())?;
        if state.phase() == ShadowPhase::Validating {
            return Err(EvolutionError::Busy(id));
        }

        let entry = state.next_entry(change_type, data);
        if state.config().experiment_mode {
            entry.mutation().apply_to(&state.state_tree()?)?;
        }
        state.push(entry.clone());
        debug!(
            target: "pagi::shadow",
            shadow_id = %id,
            change_id = entry.id,
            change_type = %entry.change_type,
            "Change logged to shadow"
        );
        Ok(entry)
    }

    // ---- Validation support ----

    /// Mark a shadow as under validation. Fails with `Busy` if one is already in flight.
    pub async fn begin_validation(&self, id: ShadowId) -> Result<(), EvolutionError> {
        let shadow = self.lookup(id)?;
        let mut state = shadow.lock().await;
        ensure_mutable(&state, Utc::now())?;
        if state.phase() == ShadowPhase::Validating {
            return Err(EvolutionError::Busy(id));
        }
        state.phase = ShadowPhase::Validating;
        Ok(())
    }

    /// Close a validation started with [`begin_validation`](Self::begin_validation).
    ///
    /// The verdict is bound to `change_id`: a later merge must present the report
    /// of that same proposal.
    pub async fn record_validation(
        &self,
        id: ShadowId,
        change_id: &str,
        passed: bool,
    ) -> Result<ValidationStatus, EvolutionError> {
        let shadow = self.lookup(id)?;
        let mut state = shadow.lock().await;
        if state.phase() != ShadowPhase::Validating {
            return Err(EvolutionError::InvalidState(format!(
                "{} is not being validated (phase {:?})",
                id,
                state.phase()
            )));
        }
        let (status, phase) = if passed {
            (ValidationStatus::Passed, ShadowPhase::Passed)
        } else {
            (ValidationStatus::Failed, ShadowPhase::Failed)
        };
        state.validation_status = status;
        state.phase = phase;
        state.validated_change = Some(change_id.to_string());
        info!(
            target: "pagi::shadow",
            shadow_id = %id,
            change_id = %change_id,
            status = ?status,
            "Shadow validation recorded"
        );
        Ok(status)
    }

    /// Exercise the undo path of every logged change.
    ///
    /// The log is replayed onto a scratch copy of the original snapshot while
    /// journaling previous values, the journal is reverted in reverse order, and
    /// the copy must hash back to where it started. Returns `false` when the
    /// shadow disallows rollback, runs degraded, or the probe fails.
    pub async fn test_rollback_capability(&self, id: ShadowId) -> Result<bool, EvolutionError> {
        let shadow = self.lookup(id)?;
        let state = shadow.lock().await;
        ensure_mutable(&state, Utc::now())?;
        if !state.config().rollback_capability {
            return Ok(false);
        }
        if state.degraded().is_some() {
            debug!(
                target: "pagi::shadow",
                shadow_id = %id,
                "Rollback not demonstrable on a degraded shadow"
            );
            return Ok(false);
        }
        if state.config().memory_protection == MemoryProtection::Strict && !state.snapshot_intact()
        {
            return Err(EvolutionError::IntegrityViolation(id));
        }
        let Some(db) = state.storage_db() else {
            return Ok(false);
        };
        let snapshot = state.shared_snapshot();
        let entries = state.changes().to_vec();

        let outcome =
            tokio::task::spawn_blocking(move || probe_rollback(&db, &snapshot, &entries)).await?;
        drop(state);

        match outcome {
            Ok(restored) => {
                debug!(
                    target: "pagi::shadow",
                    shadow_id = %id,
                    restored,
                    "Rollback probe finished"
                );
                Ok(restored)
            }
            Err(e) => {
                warn!(
                    target: "pagi::shadow",
                    shadow_id = %id,
                    error = %e,
                    "Rollback probe failed"
                );
                Ok(false)
            }
        }
    }

    // ---- Merge / discard / cleanup ----

    /// Apply an approved shadow's changes to live state, in log order, then clean up.
    ///
    /// Fails with `ValidationRejected` (and leaves the shadow registered) unless the
    /// report is approved and any required rollback was demonstrated. With
    /// `validation_required`, the shadow must also be `PASSED` with a verdict
    /// recorded for the report's own proposal. Once application starts, individual
    /// failures are recorded in the audit trail and the merge carries on.
    pub async fn merge_approved_changes(
        &self,
        id: ShadowId,
        report: &ValidationReport,
    ) -> Result<MergeResult, EvolutionError> {
        let shadow = self.lookup(id)?;
        let entries = {
            let mut state = shadow.lock().await;
            ensure_mutable(&state, Utc::now())?;
            if state.phase() == ShadowPhase::Validating {
                return Err(EvolutionError::Busy(id));
            }
            if !report.is_approved() {
                return Err(EvolutionError::ValidationRejected(format!(
                    "proposal {} was {}",
                    report.change_id, report.result
                )));
            }
            if !report.rollback_satisfied() {
                return Err(EvolutionError::ValidationRejected(format!(
                    "proposal {} requires rollback but no working undo path was demonstrated",
                    report.change_id
                )));
            }
            if state.config().validation_required {
                if state.phase() != ShadowPhase::Passed
                    || state.validation_status() != ValidationStatus::Passed
                {
                    return Err(EvolutionError::ValidationRejected(format!(
                        "{} has not passed its own validation (phase {:?})",
                        id,
                        state.phase()
                    )));
                }
                if state.validated_change() != Some(report.change_id.as_str()) {
                    return Err(EvolutionError::ValidationRejected(format!(
                        "report for proposal {} does not match the verdict recorded on {}",
                        report.change_id, id
                    )));
                }
            }
            if state.config().memory_protection == MemoryProtection::Strict
                && !state.snapshot_intact()
            {
                return Err(EvolutionError::IntegrityViolation(id));
            }
            state.phase = ShadowPhase::Merged;
            state.changes().to_vec()
        };

        info!(
            target: "pagi::shadow::merge",
            shadow_id = %id,
            change_id = %report.change_id,
            changes = entries.len(),
            "Merging approved shadow changes"
        );
        let store = Arc::clone(&self.store);
        let applied = tokio::task::spawn_blocking(move || {
            MergeCoordinator::new(store.as_ref(), id).apply_all(&entries)
        })
        .await;
        let cleanup = self.cleanup_shadow_state(id).await;
        let audit_trail = applied?;

        let failed = audit_trail.iter().filter(|e| !e.succeeded()).count();
        let result = MergeResult {
            shadow_id: id,
            change_id: report.change_id.clone(),
            applied: audit_trail.len() - failed,
            failed,
            audit_trail,
            merged_at: Utc::now(),
            cleanup,
        };
        match result.partial_failure() {
            Some(e) => warn!(
                target: "pagi::shadow::merge",
                shadow_id = %id,
                error = %e,
                "Merge completed with failures"
            ),
            None => info!(
                target: "pagi::shadow::merge",
                shadow_id = %id,
                applied = result.applied,
                "Merge completed"
            ),
        }
        Ok(result)
    }

    /// Drop a shadow without touching live state, keeping one insight per logged change.
    pub async fn discard_shadow_state(&self, id: ShadowId) -> Result<Vec<Insight>, EvolutionError> {
        let shadow = self.lookup(id)?;
        let insights = {
            let mut state = shadow.lock().await;
            if state.phase().is_terminal() {
                return Err(EvolutionError::InvalidState(format!(
                    "{} is already {:?}",
                    id,
                    state.phase()
                )));
            }
            if state.phase() == ShadowPhase::Validating {
                return Err(EvolutionError::Busy(id));
            }
            state.phase = ShadowPhase::Discarded;
            let status = state.validation_status();
            state
                .changes()
                .iter()
                .map(|entry| Insight::from_change(entry, status))
                .collect::<Vec<_>>()
        };
        self.cleanup_shadow_state(id).await;
        info!(
            target: "pagi::shadow",
            shadow_id = %id,
            insights = insights.len(),
            "Shadow discarded"
        );
        Ok(insights)
    }

    /// Deregister a shadow and release its storage. Idempotent.
    ///
    /// Waits at most `cleanup_timeout` for an in-flight operation on the shadow;
    /// past that, release happens when the last handle drops and a warning is reported.
    pub async fn cleanup_shadow_state(&self, id: ShadowId) -> CleanupReport {
        let mut report = CleanupReport {
            shadow_id: Some(id),
            ..CleanupReport::default()
        };
        let Some(shadow) = self.registry.remove(&id) else {
            warn!(
                target: "pagi::shadow",
                shadow_id = %id,
                "Cleanup requested for a shadow that is already cleaned up"
            );
            report.already_cleaned = true;
            return report;
        };

        match tokio::time::timeout(self.config.cleanup_timeout(), shadow.lock()).await {
            Ok(mut state) => match state.take_storage() {
                Some(storage) => {
                    let released = tokio::task::spawn_blocking(move || storage.release()).await;
                    match released {
                        Ok(Ok(())) => report.released = true,
                        Ok(Err(e)) => self.cleanup_warning(&mut report, id, e.to_string()),
                        Err(e) => self.cleanup_warning(&mut report, id, e.to_string()),
                    }
                }
                None => report.released = true,
            },
            Err(_) => self.cleanup_warning(
                &mut report,
                id,
                "operation still in flight; storage is released when it finishes".to_string(),
            ),
        }
        debug!(
            target: "pagi::shadow",
            shadow_id = %id,
            released = report.released,
            "Shadow cleaned up"
        );
        report
    }

    fn cleanup_warning(&self, report: &mut CleanupReport, id: ShadowId, reason: String) {
        let warning = EvolutionError::CleanupWarning {
            shadow_id: id,
            reason,
        };
        warn!(target: "pagi::shadow", shadow_id = %id, error = %warning, "Cleanup incomplete");
        report.warnings.push(warning.to_string());
    }

    // ---- Expiry ----

    /// Force-discard expired shadows that allow automatic cleanup.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<(ShadowId, Vec<Insight>)> {
        let mut swept = Vec::new();
        for id in self.registry.ids() {
            let Some(shadow) = self.registry.get(&id) else {
                continue;
            };
            let due = {
                let state = shadow.lock().await;
                state.config().auto_cleanup && !state.phase().is_terminal() && state.is_expired(now)
            };
            if !due {
                continue;
            }
            match self.discard_shadow_state(id).await {
                Ok(insights) => {
                    info!(
                        target: "pagi::shadow",
                        shadow_id = %id,
                        insights = insights.len(),
                        "Expired shadow discarded"
                    );
                    swept.push((id, insights));
                }
                Err(e) => debug!(
                    target: "pagi::shadow",
                    shadow_id = %id,
                    error = %e,
                    "Expired shadow skipped"
                ),
            }
        }
        swept
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval`.
    ///
    /// The task holds the forker alive; abort the handle to stop it.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let forker = Arc::clone(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = forker.sweep_expired(Utc::now()).await;
                if !swept.is_empty() {
                    info!(
                        target: "pagi::shadow",
                        swept = swept.len(),
                        active = forker.registry.len(),
                        "Expiry sweep finished"
                    );
                }
            }
        })
    }

    fn lookup(&self, id: ShadowId) -> Result<SharedShadow, EvolutionError> {
        self.registry.get(&id).ok_or(EvolutionError::NotFound(id))
    }
}

fn ensure_mutable(state: &ShadowState, now: DateTime<Utc>) -> Result<(), EvolutionError> {
    if state.phase().is_terminal() {
        return Err(EvolutionError::InvalidState(format!(
            "{} is already {:?}",
            state.id(),
            state.phase()
        )));
    }
    if state.is_expired(now) {
        return Err(EvolutionError::Expired(state.id()));
    }
    Ok(())
}

fn probe_rollback(
    db: &sled::Db,
    snapshot: &SnapshotHandle,
    entries: &[ChangeEntry],
) -> Result<bool, StateError> {
    db.drop_tree(PROBE_TREE)?;
    let probe = db.open_tree(PROBE_TREE)?;
    for (key, value) in &snapshot.records {
        probe.insert(key.as_slice(), value.as_slice())?;
    }
    let before = tree_digest(&probe)?;

    let mut journal = Vec::with_capacity(entries.len());
    for entry in entries {
        journal.push(entry.mutation().apply_to(&probe)?);
    }
    for undo in journal.iter().rev() {
        undo.revert(&probe)?;
    }

    let after = tree_digest(&probe)?;
    db.drop_tree(PROBE_TREE)?;
    Ok(before == after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagi_state::SledBackingStore;
    use serde_json::json;

    fn forker_with(store: SledBackingStore) -> (ShadowStateForker, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let config = EvolutionConfig {
            shadow_root: root.path().to_path_buf(),
            ..EvolutionConfig::default()
        };
        (ShadowStateForker::with_store(Arc::new(store), config), root)
    }

    #[test]
    fn test_probe_restores_snapshot() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mut snapshot = SnapshotHandle::empty();
        snapshot
            .records
            .insert(b"a".to_vec(), serde_json::to_vec(&json!(1)).unwrap());
        let entries = vec![
            ChangeEntry::new(1, "t", json!({"key": "a", "value": 2})),
            ChangeEntry::new(2, "t", json!({"key": "a", "op": "delete"})),
            ChangeEntry::new(3, "t", json!({"key": "b", "value": 3})),
        ];
        assert!(probe_rollback(&db, &snapshot, &entries).unwrap());
        assert!(!db
            .tree_names()
            .iter()
            .any(|name| &name[..] == PROBE_TREE.as_bytes()));
    }

    #[tokio::test]
    async fn test_log_applies_in_experiment_mode_only() {
        let (forker, _root) = forker_with(SledBackingStore::temporary().unwrap());
        let observed = forker
            .create_isolated_environment(ShadowStateConfig::default())
            .await
            .unwrap();
        let blind = forker
            .create_isolated_environment(ShadowStateConfig {
                experiment_mode: false,
                ..ShadowStateConfig::default()
            })
            .await
            .unwrap();
        for id in [observed, blind] {
            forker
                .log_shadow_change(id, "t", json!({"key": "k", "value": "v"}))
                .await
                .unwrap();
        }
        let observed = forker.get_shadow_environment(observed).await.unwrap();
        let blind = forker.get_shadow_environment(blind).await.unwrap();
        assert_eq!(observed.read("k").unwrap(), Some(json!("v")));
        assert_eq!(blind.read("k").unwrap(), None);
        assert_eq!(blind.change_count, 1);
    }

    #[tokio::test]
    async fn test_validation_phase_transitions() {
        let (forker, _root) = forker_with(SledBackingStore::temporary().unwrap());
        let id = forker
            .create_isolated_environment(ShadowStateConfig::in_memory())
            .await
            .unwrap();

        assert!(matches!(
            forker.record_validation(id, "p-1", true).await,
            Err(EvolutionError::InvalidState(_))
        ));
        forker.begin_validation(id).await.unwrap();
        assert!(matches!(
            forker.begin_validation(id).await,
            Err(EvolutionError::Busy(_))
        ));
        assert!(matches!(
            forker.log_shadow_change(id, "t", json!({})).await,
            Err(EvolutionError::Busy(_))
        ));
        assert!(matches!(
            forker.discard_shadow_state(id).await,
            Err(EvolutionError::Busy(_))
        ));
        let status = forker.record_validation(id, "p-1", false).await.unwrap();
        assert_eq!(status, ValidationStatus::Failed);
        let handle = forker.get_shadow_environment(id).await.unwrap();
        assert_eq!(handle.validated_change.as_deref(), Some("p-1"));

        forker.log_shadow_change(id, "t", json!({})).await.unwrap();
        let handle = forker.get_shadow_environment(id).await.unwrap();
        assert_eq!(handle.validation_status, ValidationStatus::Pending);
        assert_eq!(handle.phase, ShadowPhase::Created);
        assert!(handle.validated_change.is_none());
    }

    #[tokio::test]
    async fn test_rollback_disabled_by_config() {
        let (forker, _root) = forker_with(SledBackingStore::temporary().unwrap());
        let id = forker
            .create_isolated_environment(ShadowStateConfig {
                rollback_capability: false,
                ..ShadowStateConfig::in_memory()
            })
            .await
            .unwrap();
        forker
            .log_shadow_change(id, "t", json!({"key": "a", "value": 1}))
            .await
            .unwrap();
        assert!(!forker.test_rollback_capability(id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_discards_expired_shadows_on_tick() {
        let (forker, _root) = forker_with(SledBackingStore::temporary().unwrap());
        let forker = Arc::new(forker);
        let stale = forker
            .create_isolated_environment(ShadowStateConfig {
                max_duration_hours: 0.0,
                ..ShadowStateConfig::in_memory()
            })
            .await
            .unwrap();
        let fresh = forker
            .create_isolated_environment(ShadowStateConfig::in_memory())
            .await
            .unwrap();
        // Expiry is judged against wall-clock time.
        std::thread::sleep(std::time::Duration::from_millis(5));

        let sweeper = forker.spawn_expiry_sweeper();
        tokio::time::sleep(forker.config().sweep_interval() / 2).await;
        assert_eq!(forker.active_shadows().len(), 2);

        tokio::time::sleep(forker.config().sweep_interval()).await;
        assert_eq!(forker.active_shadows(), vec![fresh]);
        assert!(forker.get_shadow_environment(stale).await.is_none());
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_expired_shadow_rejects_mutation_but_allows_discard() {
        let (forker, _root) = forker_with(SledBackingStore::temporary().unwrap());
        let id = forker
            .create_isolated_environment(ShadowStateConfig {
                max_duration_hours: 0.0,
                ..ShadowStateConfig::in_memory()
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(matches!(
            forker.log_shadow_change(id, "t", json!({})).await,
            Err(EvolutionError::Expired(_))
        ));
        let insights = forker.discard_shadow_state(id).await.unwrap();
        assert!(insights.is_empty());
        assert!(forker.get_shadow_environment(id).await.is_none());
    }
}
