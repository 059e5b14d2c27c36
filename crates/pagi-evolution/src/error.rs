//! Error type for shadow forking, validation and merge.

use pagi_state::StateError;
use thiserror::Error;

use crate::shadow::ShadowId;

/// Errors from the shadow pipeline.
///
/// `SnapshotDegraded`, `PartialMergeFailure` and `CleanupWarning` are non-fatal:
/// they are recorded in environment metadata, merge results and cleanup reports
/// rather than returned as the failure of an operation.
#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("shadow state not found: {0}")]
    NotFound(ShadowId),
    #[error("validation rejected merge: {0}")]
    ValidationRejected(String),
    #[error("snapshot degraded, shadow runs on a minimal store: {0}")]
    SnapshotDegraded(String),
    #[error("partial merge failure: {failed} of {total} change(s) failed to apply")]
    PartialMergeFailure { failed: usize, total: usize },
    #[error("cleanup warning for {shadow_id}: {reason}")]
    CleanupWarning { shadow_id: ShadowId, reason: String },
    #[error("shadow state {0} exceeded its maximum duration")]
    Expired(ShadowId),
    #[error("shadow state {0} already has a validation in flight")]
    Busy(ShadowId),
    #[error("invalid shadow state transition: {0}")]
    InvalidState(String),
    #[error("snapshot integrity violation on {0}: digest changed since creation")]
    IntegrityViolation(ShadowId),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<sled::Error> for EvolutionError {
    fn from(e: sled::Error) -> Self {
        EvolutionError::State(StateError::Storage(e))
    }
}

impl From<std::io::Error> for EvolutionError {
    fn from(e: std::io::Error) -> Self {
        EvolutionError::State(StateError::Io(e))
    }
}
