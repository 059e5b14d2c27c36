//! pagi-state: the agent's persisted state as seen by the self-evolution pipeline.
//!
//! Shared records (change entries, proposals, validation criteria and reports),
//! the [`BackingStore`] capability the shadow forker snapshots and merges into,
//! and its Sled implementation.

mod backing;
mod change;
mod config;
mod error;
mod proposal;
mod report;
mod store;

pub use backing::{
    tree_digest, BackingStore, SnapshotHandle, TreeRecords, AGENT_STATES_TREE, CONFIGURATION_TREE,
    STATE_TREE,
};
pub use change::{ChangeEntry, Mutation, UndoRecord};
pub use config::EvolutionConfig;
pub use error::StateError;
pub use proposal::{ChangeCategory, ChangeProposal, Priority};
pub use report::{
    CheckKind, CheckScore, RiskAssessment, RiskCategory, RiskItem, ValidationCriteria,
    ValidationDetails, ValidationLevel, ValidationReport, ValidationResult,
};
pub use store::SledBackingStore;
