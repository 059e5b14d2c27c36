//! Multi-criteria validation gate for change proposals.
//!
//! ## Assessments
//!
//! | Dimension | Source | Gate |
//! |-----------|--------|------|
//! | Safety | per-category checks, ×0.95 for high-risk categories | below threshold → rejected |
//! | Performance | per-category checks + benefit bonus (≤ 0.2) | condition when conditional |
//! | Ethics | four common checks, ×1.1 for ethical-framework | below threshold → rejected |
//! | Rollback | undo path exercised in a shadow | missing where required → rejected |
//! | Risk | declared risks, keyword-categorized | over tolerance → at best conditional |
//!
//! Scoring is synchronous and pure (see [`scoring`] and [`risk`]); the only
//! suspension points are the shadow operations behind the rollback probe.

pub mod checks;
pub mod policy;
pub mod risk;
pub mod scoring;
pub mod stats;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use pagi_state::{
    ChangeCategory, ChangeProposal, CheckKind, ValidationCriteria, ValidationDetails,
    ValidationReport, ValidationResult,
};
use serde_json::json;
use tracing::{info, warn};

use crate::error::EvolutionError;
use crate::forker::ShadowStateForker;
use crate::shadow::{ShadowId, ShadowStateConfig};

pub use checks::{Check, CheckError, CheckRegistry, KeywordCheck};
pub use policy::{CategoryPolicy, PolicyTable};
pub use stats::ValidationStatistics;

/// Reports kept for [`ValidationEngine::history`]; statistics cover every report.
pub const HISTORY_LIMIT: usize = 256;

/// Outcome of exercising a proposal's undo path.
struct RollbackProbe {
    ready: bool,
    note: Option<String>,
}

pub struct ValidationEngine {
    forker: Arc<ShadowStateForker>,
    checks: CheckRegistry,
    policies: PolicyTable,
    ledger: RwLock<Ledger>,
}

#[derive(Default)]
struct Ledger {
    recent: VecDeque<ValidationReport>,
    statistics: ValidationStatistics,
}

impl ValidationEngine {
    pub fn new(forker: Arc<ShadowStateForker>) -> Self {
        Self {
            forker,
            checks: CheckRegistry::builtin(),
            policies: PolicyTable::default(),
            ledger: RwLock::new(Ledger::default()),
        }
    }

    pub fn with_checks(mut self, checks: CheckRegistry) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn forker(&self) -> &Arc<ShadowStateForker> {
        &self.forker
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Validate a proposal, exercising its undo path in a temporary shadow.
    ///
    /// Never fails: problems with checks or the temporary shadow degrade the
    /// report instead.
    pub async fn validate_change_proposal(
        &self,
        proposal: &ChangeProposal,
        criteria: &ValidationCriteria,
    ) -> ValidationReport {
        let report = self.evaluate(proposal, criteria).await;
        self.record(std::slice::from_ref(&report));
        report
    }

    /// Validate the changes already logged in a caller-managed shadow.
    ///
    /// The shadow moves to `VALIDATING` for the duration and ends `PASSED` when
    /// the report is approved, `FAILED` otherwise.
    pub async fn validate_shadow(
        &self,
        id: ShadowId,
        proposal: &ChangeProposal,
        criteria: &ValidationCriteria,
    ) -> Result<ValidationReport, EvolutionError> {
        self.forker.begin_validation(id).await?;
        let ready = match self.forker.test_rollback_capability(id).await {
            Ok(ready) => ready,
            Err(e) => {
                if let Err(close) = self.forker.record_validation(id, &proposal.id, false).await {
                    warn!(target: "pagi::validation", shadow_id = %id, error = %close, "Could not close validation");
                }
                return Err(e);
            }
        };
        let report = self.assess(proposal, criteria, RollbackProbe { ready, note: None });
        self.forker
            .record_validation(id, &proposal.id, report.is_approved())
            .await?;
        self.record(std::slice::from_ref(&report));
        Ok(report)
    }

    /// Validate proposals independently, then resolve conflicts between approvals.
    ///
    /// More proposals than `max_simultaneous_changes` only produce a warning and
    /// a recommendation on the excess reports. Approved proposals sharing a
    /// category are merged one at a time: all but the highest-scoring are
    /// downgraded to conditional.
    pub async fn batch_validate_changes(
        &self,
        proposals: &[ChangeProposal],
        criteria: &ValidationCriteria,
    ) -> Vec<ValidationReport> {
        let limit = criteria.max_simultaneous_changes;
        if proposals.len() > limit {
            warn!(
                target: "pagi::validation",
                proposals = proposals.len(),
                limit,
                "Batch exceeds max simultaneous changes"
            );
        }

        let mut reports = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            reports.push(self.evaluate(proposal, criteria).await);
        }
        for report in reports.iter_mut().skip(limit) {
            report.recommendations.push(format!(
                "Batch of {} exceeds the limit of {} simultaneous changes; stage this change in a later batch",
                proposals.len(),
                limit
            ));
        }
        resolve_conflicts(&mut reports);

        self.record(&reports);
        reports
    }

    pub fn get_validation_statistics(&self) -> ValidationStatistics {
        match self.ledger.read() {
            Ok(ledger) => ledger.statistics.clone(),
            Err(poisoned) => poisoned.into_inner().statistics.clone(),
        }
    }

    /// The most recent reports, oldest first, at most [`HISTORY_LIMIT`].
    pub fn history(&self) -> Vec<ValidationReport> {
        match self.ledger.read() {
            Ok(ledger) => ledger.recent.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().recent.iter().cloned().collect(),
        }
    }

    // ---- Internals ----

    async fn evaluate(&self, proposal: &ChangeProposal, criteria: &ValidationCriteria) -> ValidationReport {
        let probe = self.probe_rollback(proposal).await;
        self.assess(proposal, criteria, probe)
    }

    /// Log the proposal's modifications into a throwaway in-memory shadow and
    /// exercise their undo path there.
    async fn probe_rollback(&self, proposal: &ChangeProposal) -> RollbackProbe {
        let config = ShadowStateConfig {
            experiment_mode: false,
            ..ShadowStateConfig::in_memory()
        };
        let id = match self.forker.create_isolated_environment(config).await {
            Ok(id) => id,
            Err(e) => {
                warn!(target: "pagi::validation", proposal_id = %proposal.id, error = %e, "Rollback probe shadow unavailable");
                return RollbackProbe {
                    ready: false,
                    note: Some(format!("rollback probe could not start: {}", e)),
                };
            }
        };

        let outcome = self.exercise(id, proposal).await;
        self.forker.cleanup_shadow_state(id).await;
        match outcome {
            Ok(ready) => RollbackProbe { ready, note: None },
            Err(e) => {
                warn!(target: "pagi::validation", proposal_id = %proposal.id, error = %e, "Rollback probe failed");
                RollbackProbe {
                    ready: false,
                    note: Some(format!("rollback probe failed: {}", e)),
                }
            }
        }
    }

    async fn exercise(&self, id: ShadowId, proposal: &ChangeProposal) -> Result<bool, EvolutionError> {
        for (key, value) in &proposal.proposed_modifications {
            self.forker
                .log_shadow_change(id, proposal.category.as_str(), json!({ "key": key, "value": value }))
                .await?;
        }
        self.forker.test_rollback_capability(id).await
    }

    fn assess(
        &self,
        proposal: &ChangeProposal,
        criteria: &ValidationCriteria,
        probe: RollbackProbe,
    ) -> ValidationReport {
        let policy = self.policies.get(proposal.category);

        let safety_checks = self.checks.run(proposal, CheckKind::Safety);
        let performance_checks = self.checks.run(proposal, CheckKind::Performance);
        let ethics_checks = self.checks.run(proposal, CheckKind::Ethics);

        let (safety, safety_multiplier) = scoring::safety_score(&safety_checks, &policy);
        let performance_bonus = scoring::performance_bonus(&proposal.expected_benefits);
        let performance = scoring::performance_score(&performance_checks, performance_bonus);
        let (ethics, ethics_multiplier) = scoring::ethics_score(&ethics_checks, proposal.category);
        let risk = risk::assess(proposal, policy.max_risk_tolerance);
        let (composite_base, overall) = scoring::composite(
            safety,
            performance,
            ethics,
            criteria.level,
            probe.ready,
            risk.risk_level,
        );

        let dissent = scoring::dissenting_checks(
            safety_checks
                .iter()
                .chain(performance_checks.iter())
                .chain(ethics_checks.iter()),
            criteria,
        );
        let verdict = scoring::decide(
            &scoring::ScoreCard {
                safety,
                performance,
                ethics,
                overall,
                rollback_ready: probe.ready,
                risk: &risk,
                dissent,
            },
            criteria,
            &policy,
        );

        let mut recommendations = Vec::new();
        if let Some(note) = probe.note {
            recommendations.push(format!("Re-run the rollback probe: {}", note));
        }
        for check in safety_checks
            .iter()
            .chain(performance_checks.iter())
            .chain(ethics_checks.iter())
        {
            if let Some(reason) = &check.degraded {
                recommendations.push(format!("Investigate {} check ({}): {}", check.kind, check.name, reason));
            }
        }
        for reason in &verdict.hard_rejections {
            recommendations.push(format!("Revise the proposal: {}", reason));
        }
        if performance_bonus == 0.0 && proposal.category != ChangeCategory::EthicalFramework {
            recommendations.push("Quantify the expected performance gains of this change".to_string());
        }
        recommendations.extend(risk.mitigations.iter().cloned());

        let mut report = ValidationReport {
            change_id: proposal.id.clone(),
            category: proposal.category,
            result: ValidationResult::Rejected,
            overall_score: overall,
            safety_score: safety,
            performance_score: performance,
            ethics_score: ethics,
            risk_level: risk.risk_level,
            rollback_ready: probe.ready,
            rollback_required: criteria.rollback_requirement || policy.rollback_critical,
            details: ValidationDetails {
                safety_checks,
                performance_checks,
                performance_bonus,
                ethics_checks,
                safety_multiplier,
                ethics_multiplier,
                risk,
                composite_base,
                hard_rejections: verdict.hard_rejections,
            },
            recommendations,
            conditions: Vec::new(),
            validated_at: Utc::now(),
            approval_timestamp: None,
        };
        report.set_result(verdict.result);
        report.conditions = verdict.conditions;

        info!(
            target: "pagi::validation",
            proposal_id = %report.change_id,
            category = %report.category,
            result = %report.result,
            overall = report.overall_score,
            safety = report.safety_score,
            performance = report.performance_score,
            ethics = report.ethics_score,
            risk = report.risk_level,
            rollback_ready = report.rollback_ready,
            "Proposal validated"
        );
        report
    }

    fn record(&self, reports: &[ValidationReport]) {
        let mut ledger = match self.ledger.write() {
            Ok(ledger) => ledger,
            Err(poisoned) => poisoned.into_inner(),
        };
        for report in reports {
            ledger.statistics.record(report);
            if ledger.recent.len() == HISTORY_LIMIT {
                ledger.recent.pop_front();
            }
            ledger.recent.push_back(report.clone());
        }
    }
}

/// Downgrade all but the best approval in each category to conditional.
fn resolve_conflicts(reports: &mut [ValidationReport]) {
    let mut approved: BTreeMap<ChangeCategory, Vec<usize>> = BTreeMap::new();
    for (index, report) in reports.iter().enumerate() {
        if report.is_approved() {
            approved.entry(report.category).or_default().push(index);
        }
    }

    for (category, indices) in approved {
        if indices.len() < 2 {
            continue;
        }
        let mut winner = indices[0];
        for &index in &indices[1..] {
            if reports[index].overall_score > reports[winner].overall_score {
                winner = index;
            }
        }
        let winner_id = reports[winner].change_id.clone();
        warn!(
            target: "pagi::validation",
            category = %category,
            approvals = indices.len(),
            kept = %winner_id,
            "Conflicting approvals in one batch"
        );
        for &index in &indices {
            let report = &mut reports[index];
            report.recommendations.push(format!(
                "{} approved changes target {}; merge them one at a time",
                indices.len(),
                category
            ));
            if index != winner {
                report.set_result(ValidationResult::Conditional);
                report.conditions.push(format!(
                    "conflicts with {} in {}; merge after it and re-validate",
                    winner_id, category
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagi_state::{EvolutionConfig, SledBackingStore};

    fn engine() -> (ValidationEngine, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let config = EvolutionConfig {
            shadow_root: root.path().to_path_buf(),
            ..EvolutionConfig::default()
        };
        let store = Arc::new(SledBackingStore::temporary().unwrap());
        let forker = Arc::new(ShadowStateForker::with_store(store, config));
        (ValidationEngine::new(forker), root)
    }

    fn clean(category: ChangeCategory) -> ChangeProposal {
        ChangeProposal::new("reflection", category, "Tune weighting of recent experiences", 0.9)
            .with_modification("tuning/recency", json!(0.4))
            .with_benefit("Faster recall of relevant context")
    }

    #[tokio::test]
    async fn test_probe_cleans_up_temporary_shadow() {
        let (engine, _root) = engine();
        let report = engine
            .validate_change_proposal(&clean(ChangeCategory::LearningStrategy), &ValidationCriteria::default())
            .await;
        assert!(report.rollback_ready);
        assert!(engine.forker().active_shadows().is_empty());
    }

    #[tokio::test]
    async fn test_batch_conflicts_keep_best_approval() {
        let (engine, _root) = engine();
        let proposals = vec![
            clean(ChangeCategory::MetaLearning).with_risk("Minor log noise"),
            clean(ChangeCategory::MetaLearning),
            clean(ChangeCategory::DecisionMaking),
        ];
        let reports = engine
            .batch_validate_changes(&proposals, &ValidationCriteria::default())
            .await;
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].result, ValidationResult::Approved);
        assert_eq!(reports[0].result, ValidationResult::Conditional);
        assert!(reports[0].conditions[0].contains(&proposals[1].id));
        assert_eq!(reports[2].result, ValidationResult::Approved);
        assert_eq!(engine.get_validation_statistics().total, 3);
    }

    #[tokio::test]
    async fn test_history_is_bounded_but_statistics_are_not() {
        let (engine, _root) = engine();
        let report = engine
            .validate_change_proposal(&clean(ChangeCategory::MetaLearning), &ValidationCriteria::default())
            .await;
        engine.record(&vec![report; HISTORY_LIMIT + 10]);

        assert_eq!(engine.history().len(), HISTORY_LIMIT);
        let stats = engine.get_validation_statistics();
        assert_eq!(stats.total, HISTORY_LIMIT + 11);
        assert_eq!(stats.category_distribution[&ChangeCategory::MetaLearning], HISTORY_LIMIT + 11);
    }

    #[tokio::test]
    async fn test_batch_over_limit_warns_only() {
        let (engine, _root) = engine();
        let criteria = ValidationCriteria {
            max_simultaneous_changes: 1,
            ..ValidationCriteria::default()
        };
        let proposals = vec![
            clean(ChangeCategory::LearningStrategy),
            clean(ChangeCategory::CuriosityExploration),
        ];
        let reports = engine.batch_validate_changes(&proposals, &criteria).await;
        assert!(reports.iter().all(|r| r.result == ValidationResult::Approved));
        assert!(reports[1]
            .recommendations
            .iter()
            .any(|r| r.contains("simultaneous")));
        assert!(!reports[0]
            .recommendations
            .iter()
            .any(|r| r.contains("simultaneous")));
    }
}
