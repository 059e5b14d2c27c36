//! pagi-evolution: Self-evolving agent core.
//!
//! The agent proposes changes to its own persisted state and applies them only
//! after they pass a multi-criteria gate, with full isolation and rollback.
//!
//! ## Shadow States
//!
//! The `ShadowStateForker` provides:
//! - **Isolation:** every shadow runs on a private Sled copy of a point-in-time snapshot.
//! - **Change Logging:** ordered, append-only change log per shadow.
//! - **Merge:** approved logs are applied to live state change by change, with an audit trail.
//! - **Discard:** rejected logs are turned into insights and nothing reaches live state.
//! - **Expiry:** stale shadows are swept on an interval.
//!
//! ## Validation Gate
//!
//! The `ValidationEngine` scores a `ChangeProposal` on safety, performance and
//! ethics, exercises its undo path in a shadow, weighs declared risks against the
//! category's tolerance, and returns a `ValidationReport` that gates the merge.

mod error;
pub mod forker;
pub mod merge;
pub mod registry;
pub mod shadow;
pub mod validation;

pub use error::EvolutionError;
pub use forker::ShadowStateForker;
pub use merge::{AuditEntry, AuditOutcome, CleanupReport, Insight, MergeResult};
pub use registry::{InMemoryShadowRegistry, ShadowRegistry, SharedShadow};
pub use shadow::{
    EnvironmentHandle, IsolationLevel, MemoryProtection, ShadowId, ShadowPhase,
    ShadowStateConfig, ValidationStatus,
};
pub use validation::{
    CategoryPolicy, Check, CheckError, CheckRegistry, KeywordCheck, PolicyTable,
    ValidationEngine, ValidationStatistics,
};

pub use pagi_state::{
    BackingStore, ChangeCategory, ChangeEntry, ChangeProposal, EvolutionConfig, Priority,
    SledBackingStore, StateError, ValidationCriteria, ValidationLevel, ValidationReport,
    ValidationResult,
};
