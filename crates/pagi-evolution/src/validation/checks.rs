//! Pluggable validation checks and the per-category registry that runs them.
//!
//! Built-in checks are data: a [`KeywordCheck`] starts from a baseline score and
//! loses a fixed penalty for every hazard keyword found in the proposal's
//! description and modifications. Custom checks implement [`Check`] and are
//! registered per category (or for every category) on a [`CheckRegistry`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use pagi_state::{ChangeCategory, ChangeProposal, CheckKind, CheckScore};
use thiserror::Error;
use tracing::warn;

use super::scoring::CONSERVATIVE_SCORE;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("check input unavailable: {0}")]
    MissingInput(String),
    #[error("check failed: {0}")]
    Failed(String),
}

pub trait Check: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> CheckKind;
    /// Score in [0, 1]; higher is safer / faster / more aligned.
    fn evaluate(&self, proposal: &ChangeProposal) -> Result<f64, CheckError>;
}

/// Baseline score minus a penalty per hazard keyword present.
#[derive(Debug, Clone)]
pub struct KeywordCheck {
    name: String,
    kind: CheckKind,
    baseline: f64,
    penalty: f64,
    keywords: Vec<String>,
}

impl KeywordCheck {
    pub fn new(name: impl Into<String>, kind: CheckKind, baseline: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            baseline,
            penalty: 0.25,
            keywords: Vec::new(),
        }
    }

    pub fn penalize(mut self, keywords: &[&str], penalty: f64) -> Self {
        self.keywords
            .extend(keywords.iter().map(|k| k.to_lowercase()));
        self.penalty = penalty;
        self
    }

    pub fn hits(&self, text: &str) -> usize {
        self.keywords.iter().filter(|k| text.contains(k.as_str())).count()
    }
}

impl Check for KeywordCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CheckKind {
        self.kind
    }

    fn evaluate(&self, proposal: &ChangeProposal) -> Result<f64, CheckError> {
        let hits = self.hits(&proposal.searchable_text());
        Ok((self.baseline - self.penalty * hits as f64).clamp(0.0, 1.0))
    }
}

const SAFETY_BASELINE: f64 = 0.9;
const PERFORMANCE_BASELINE: f64 = 0.8;
const ETHICS_BASELINE: f64 = 0.95;

/// (category, check name, hazard keywords)
const SAFETY_RULES: &[(ChangeCategory, &str, &[&str])] = &[
    (ChangeCategory::MemoryOrganization, "memory_integrity", &["delete", "purge", "wipe", "corrupt"]),
    (ChangeCategory::MemoryOrganization, "data_preservation", &["drop", "truncate", "erase", "discard"]),
    (ChangeCategory::LearningStrategy, "learning_stability", &["unbounded", "diverge", "aggressive", "reset"]),
    (ChangeCategory::LearningStrategy, "knowledge_retention", &["forget", "erase", "discard", "overwrite"]),
    (ChangeCategory::DecisionMaking, "decision_consistency", &["random", "arbitrary", "override"]),
    (ChangeCategory::DecisionMaking, "bias_detection", &["bias", "always prefer", "exclude"]),
    (ChangeCategory::EthicalFramework, "value_alignment", &["bypass", "ignore", "disable", "override"]),
    (ChangeCategory::EthicalFramework, "ethical_consistency", &["contradict", "exception", "loophole"]),
    (ChangeCategory::ConflictResolution, "resolution_fairness", &["always favor", "ignore", "suppress"]),
    (ChangeCategory::ConflictResolution, "escalation_safety", &["escalate", "force", "coerce"]),
    (ChangeCategory::CuriosityExploration, "exploration_bounds", &["unbounded", "unlimited", "unrestricted"]),
    (ChangeCategory::CuriosityExploration, "resource_limits", &["exhaust", "infinite", "no limit"]),
    (ChangeCategory::MetaLearning, "recursive_stability", &["recursive", "self-modify", "unbounded"]),
    (ChangeCategory::MetaLearning, "meta_consistency", &["contradict", "override"]),
    (ChangeCategory::SystemConfiguration, "config_validity", &["invalid", "malformed", "null"]),
    (ChangeCategory::SystemConfiguration, "system_stability", &["disable", "shutdown", "restart", "kill"]),
];

const PERFORMANCE_RULES: &[(ChangeCategory, &str, &[&str])] = &[
    (ChangeCategory::MemoryOrganization, "retrieval_latency", &["full scan", "reindex", "rebuild"]),
    (ChangeCategory::LearningStrategy, "convergence_speed", &["retrain", "from scratch"]),
    (ChangeCategory::DecisionMaking, "decision_latency", &["exhaustive", "brute force"]),
    (ChangeCategory::CuriosityExploration, "exploration_cost", &["exhaustive", "every"]),
];

const ETHICS_RULES: &[(&str, &[&str])] = &[
    ("value_preservation", &["deceive", "manipulate", "bypass"]),
    ("harm_prevention", &["harm", "damage", "attack", "exploit"]),
    ("fairness", &["discriminate", "unfair", "exclude"]),
    ("autonomy_preservation", &["coerce", "override user", "without consent"]),
];

/// Checks keyed by category, plus checks that apply to every category.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    by_category: HashMap<ChangeCategory, Vec<Arc<dyn Check>>>,
    common: Vec<Arc<dyn Check>>,
}

impl CheckRegistry {
    /// Registry with no checks at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in safety, performance and ethics rules.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (category, name, keywords) in SAFETY_RULES {
            registry.register(
                *category,
                KeywordCheck::new(*name, CheckKind::Safety, SAFETY_BASELINE).penalize(keywords, 0.25),
            );
        }
        registry.register_common(
            KeywordCheck::new("resource_efficiency", CheckKind::Performance, PERFORMANCE_BASELINE)
                .penalize(&["slow", "blocking", "unbounded memory"], 0.2),
        );
        for (category, name, keywords) in PERFORMANCE_RULES {
            registry.register(
                *category,
                KeywordCheck::new(*name, CheckKind::Performance, PERFORMANCE_BASELINE)
                    .penalize(keywords, 0.2),
            );
        }
        for (name, keywords) in ETHICS_RULES {
            registry.register_common(
                KeywordCheck::new(*name, CheckKind::Ethics, ETHICS_BASELINE).penalize(keywords, 0.3),
            );
        }
        registry
    }

    pub fn register(&mut self, category: ChangeCategory, check: impl Check + 'static) {
        self.by_category
            .entry(category)
            .or_default()
            .push(Arc::new(check));
    }

    pub fn register_common(&mut self, check: impl Check + 'static) {
        self.common.push(Arc::new(check));
    }

    pub fn checks_for(&self, category: ChangeCategory, kind: CheckKind) -> Vec<Arc<dyn Check>> {
        self.by_category
            .get(&category)
            .into_iter()
            .flatten()
            .chain(self.common.iter())
            .filter(|check| check.kind() == kind)
            .cloned()
            .collect()
    }

    /// Run every check of one dimension. Failures degrade to a conservative score.
    pub fn run(&self, proposal: &ChangeProposal, kind: CheckKind) -> Vec<CheckScore> {
        self.checks_for(proposal.category, kind)
            .iter()
            .map(|check| run_check(check.as_ref(), proposal))
            .collect()
    }
}

fn run_check(check: &dyn Check, proposal: &ChangeProposal) -> CheckScore {
    let outcome = catch_unwind(AssertUnwindSafe(|| check.evaluate(proposal)));
    let (score, degraded) = match outcome {
        Ok(Ok(score)) if score.is_finite() => (score.clamp(0.0, 1.0), None),
        Ok(Ok(score)) => (CONSERVATIVE_SCORE, Some(format!("non-finite score {}", score))),
        Ok(Err(e)) => (CONSERVATIVE_SCORE, Some(e.to_string())),
        Err(_) => (CONSERVATIVE_SCORE, Some("check panicked".to_string())),
    };
    if let Some(reason) = &degraded {
        warn!(
            target: "pagi::validation",
            check = check.name(),
            kind = %check.kind(),
            proposal_id = %proposal.id,
            reason = %reason,
            "Check degraded to conservative score"
        );
    }
    CheckScore {
        name: check.name().to_string(),
        kind: check.kind(),
        score,
        degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Check for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn kind(&self) -> CheckKind {
            CheckKind::Safety
        }

        fn evaluate(&self, _: &ChangeProposal) -> Result<f64, CheckError> {
            Err(CheckError::MissingInput("telemetry".to_string()))
        }
    }

    struct Panicking;

    impl Check for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn kind(&self) -> CheckKind {
            CheckKind::Safety
        }

        fn evaluate(&self, _: &ChangeProposal) -> Result<f64, CheckError> {
            panic!("boom")
        }
    }

    struct NotANumber;

    impl Check for NotANumber {
        fn name(&self) -> &str {
            "nan"
        }

        fn kind(&self) -> CheckKind {
            CheckKind::Safety
        }

        fn evaluate(&self, _: &ChangeProposal) -> Result<f64, CheckError> {
            Ok(f64::NAN)
        }
    }

    fn proposal(category: ChangeCategory, description: &str) -> ChangeProposal {
        ChangeProposal::new("test", category, description, 0.8)
    }

    #[test]
    fn test_builtin_covers_every_category() {
        let registry = CheckRegistry::builtin();
        for category in ChangeCategory::all() {
            assert_eq!(registry.checks_for(category, CheckKind::Safety).len(), 2);
            assert!(!registry.checks_for(category, CheckKind::Performance).is_empty());
            assert_eq!(registry.checks_for(category, CheckKind::Ethics).len(), 4);
        }
    }

    #[test]
    fn test_keyword_penalties() {
        let registry = CheckRegistry::builtin();
        let clean = registry.run(
            &proposal(ChangeCategory::MemoryOrganization, "Group episodic memories by topic"),
            CheckKind::Safety,
        );
        assert!(clean.iter().all(|s| s.score == SAFETY_BASELINE));

        let risky = registry.run(
            &proposal(ChangeCategory::MemoryOrganization, "Purge and wipe stale memories"),
            CheckKind::Safety,
        );
        let integrity = risky.iter().find(|s| s.name == "memory_integrity").unwrap();
        assert!((integrity.score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_failures_degrade_to_conservative_score() {
        let mut registry = CheckRegistry::empty();
        registry.register(ChangeCategory::MetaLearning, Failing);
        registry.register(ChangeCategory::MetaLearning, Panicking);
        registry.register(ChangeCategory::MetaLearning, NotANumber);

        let scores = registry.run(
            &proposal(ChangeCategory::MetaLearning, "Tune meta learning rate"),
            CheckKind::Safety,
        );
        assert_eq!(scores.len(), 3);
        for score in &scores {
            assert_eq!(score.score, CONSERVATIVE_SCORE);
            assert!(score.degraded.is_some());
        }
        assert!(scores[0].degraded.as_deref().unwrap().contains("telemetry"));
    }

    #[test]
    fn test_common_checks_apply_to_all_categories() {
        let mut registry = CheckRegistry::empty();
        registry.register_common(KeywordCheck::new("common", CheckKind::Ethics, 0.7));
        assert_eq!(
            registry
                .checks_for(ChangeCategory::DecisionMaking, CheckKind::Ethics)
                .len(),
            1
        );
        assert!(registry
            .checks_for(ChangeCategory::DecisionMaking, CheckKind::Safety)
            .is_empty());
    }
}
