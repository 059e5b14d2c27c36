//! Merge coordination and the records produced when a shadow ends.

use chrono::{DateTime, Utc};
use pagi_state::{BackingStore, ChangeEntry};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EvolutionError;
use crate::shadow::{ShadowId, ValidationStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AuditOutcome {
    Applied,
    Failed { error: String },
}

/// One applied (or failed) change in a merge, in log order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: usize,
    pub change_id: u64,
    pub change_type: String,
    pub description: String,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn succeeded(&self) -> bool {
        self.outcome == AuditOutcome::Applied
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub shadow_id: Option<ShadowId>,
    /// Storage was released synchronously.
    pub released: bool,
    /// The shadow was no longer registered; nothing to do.
    pub already_cleaned: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub shadow_id: ShadowId,
    /// Id of the proposal whose report authorized the merge.
    pub change_id: String,
    pub audit_trail: Vec<AuditEntry>,
    pub applied: usize,
    pub failed: usize,
    pub merged_at: DateTime<Utc>,
    pub cleanup: CleanupReport,
}

impl MergeResult {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// `PartialMergeFailure` when at least one change did not apply.
    pub fn partial_failure(&self) -> Option<EvolutionError> {
        (self.failed > 0).then(|| EvolutionError::PartialMergeFailure {
            failed: self.failed,
            total: self.audit_trail.len(),
        })
    }
}

/// Lesson extracted from a discarded change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub change_id: u64,
    pub change_type: String,
    pub summary: String,
    pub attempted_at: DateTime<Utc>,
}

impl Insight {
    pub fn from_change(entry: &ChangeEntry, status: ValidationStatus) -> Self {
        let mutation = entry.mutation();
        let verdict = match status {
            ValidationStatus::Pending => "never validated",
            ValidationStatus::Passed => "passed validation but was not merged",
            ValidationStatus::Failed => "failed validation",
        };
        Self {
            change_id: entry.id,
            change_type: entry.change_type.clone(),
            summary: format!(
                "Attempted {} change #{} targeting '{}' ({}); {}",
                entry.change_type,
                entry.id,
                mutation.key(),
                mutation.describe(),
                verdict
            ),
            attempted_at: entry.timestamp,
        }
    }
}

/// Applies a shadow's change log to live state, one change at a time.
///
/// A failing change is recorded and the merge moves on to the next one.
pub struct MergeCoordinator<'a> {
    store: &'a dyn BackingStore,
    shadow_id: ShadowId,
}

impl<'a> MergeCoordinator<'a> {
    pub fn new(store: &'a dyn BackingStore, shadow_id: ShadowId) -> Self {
        Self { store, shadow_id }
    }

    pub fn apply_all(&self, entries: &[ChangeEntry]) -> Vec<AuditEntry> {
        entries
            .iter()
            .enumerate()
            .map(|(sequence, entry)| self.apply_one(sequence, entry))
            .collect()
    }

    fn apply_one(&self, sequence: usize, entry: &ChangeEntry) -> AuditEntry {
        let description = entry.mutation().describe();
        let outcome = match self.store.apply(entry) {
            Ok(()) => {
                info!(
                    target: "pagi::shadow::merge",
                    shadow_id = %self.shadow_id,
                    change_id = entry.id,
                    change_type = %entry.change_type,
                    "Change merged into live state"
                );
                AuditOutcome::Applied
            }
            Err(e) => {
                warn!(
                    target: "pagi::shadow::merge",
                    shadow_id = %self.shadow_id,
                    change_id = entry.id,
                    error = %e,
                    "Change failed to merge; continuing with remaining changes"
                );
                AuditOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        AuditEntry {
            sequence,
            change_id: entry.id,
            change_type: entry.change_type.clone(),
            description,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}
