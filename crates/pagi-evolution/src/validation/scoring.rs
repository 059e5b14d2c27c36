//! Pure scoring and decision functions. Every score leaving this module is in [0, 1].

use pagi_state::{
    ChangeCategory, CheckKind, CheckScore, RiskAssessment, ValidationCriteria, ValidationLevel,
    ValidationResult,
};

use super::policy::CategoryPolicy;

/// Score used for a check that failed, panicked or returned a non-finite value.
pub const CONSERVATIVE_SCORE: f64 = 0.3;
/// Score of a dimension with no registered checks.
pub const EMPTY_DIMENSION_SCORE: f64 = 0.5;

pub const HIGH_RISK_SAFETY_MULTIPLIER: f64 = 0.95;
pub const ETHICAL_FRAMEWORK_MULTIPLIER: f64 = 1.1;
pub const CRITICAL_LEVEL_DAMPING: f64 = 0.9;

const PERFORMANCE_BONUS_PER_BENEFIT: f64 = 0.1;
const PERFORMANCE_BONUS_CAP: f64 = 0.2;
const PERFORMANCE_TERMS: &[&str] = &[
    "faster",
    "performance",
    "efficien",
    "speed",
    "latency",
    "throughput",
    "optimiz",
];

const ROLLBACK_READY_BONUS: f64 = 0.1;
const ROLLBACK_MISSING_PENALTY: f64 = 0.2;
const RISK_WEIGHT: f64 = 0.3;

const APPROVE_AT: f64 = 0.8;
const CONDITIONAL_AT: f64 = 0.6;
const REVIEW_AT: f64 = 0.4;

/// Clamp to [0, 1]; NaN becomes 0.
pub fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn average(checks: &[CheckScore]) -> f64 {
    if checks.is_empty() {
        return EMPTY_DIMENSION_SCORE;
    }
    unit(checks.iter().map(|c| unit(c.score)).sum::<f64>() / checks.len() as f64)
}

/// Averaged safety score and the multiplier applied to it.
pub fn safety_score(checks: &[CheckScore], policy: &CategoryPolicy) -> (f64, f64) {
    let multiplier = if policy.high_risk {
        HIGH_RISK_SAFETY_MULTIPLIER
    } else {
        1.0
    };
    (unit(average(checks) * multiplier), multiplier)
}

/// 0.1 per expected benefit mentioning a performance gain, capped at 0.2.
pub fn performance_bonus(benefits: &[String]) -> f64 {
    let mentions = benefits
        .iter()
        .filter(|b| {
            let b = b.to_lowercase();
            PERFORMANCE_TERMS.iter().any(|term| b.contains(term))
        })
        .count();
    (mentions as f64 * PERFORMANCE_BONUS_PER_BENEFIT).min(PERFORMANCE_BONUS_CAP)
}

pub fn performance_score(checks: &[CheckScore], bonus: f64) -> f64 {
    unit(average(checks) + bonus)
}

pub fn ethics_score(checks: &[CheckScore], category: ChangeCategory) -> (f64, f64) {
    let multiplier = if category == ChangeCategory::EthicalFramework {
        ETHICAL_FRAMEWORK_MULTIPLIER
    } else {
        1.0
    };
    (unit(average(checks) * multiplier), multiplier)
}

/// Returns `(base, composite)`: the plain mean of the three dimensions, and the
/// final score after level damping, rollback adjustment and risk weighting.
pub fn composite(
    safety: f64,
    performance: f64,
    ethics: f64,
    level: ValidationLevel,
    rollback_ready: bool,
    risk_level: f64,
) -> (f64, f64) {
    let base = unit((unit(safety) + unit(performance) + unit(ethics)) / 3.0);
    let mut score = base;
    if level == ValidationLevel::Critical {
        score *= CRITICAL_LEVEL_DAMPING;
    }
    score += if rollback_ready {
        ROLLBACK_READY_BONUS
    } else {
        -ROLLBACK_MISSING_PENALTY
    };
    score -= unit(risk_level) * RISK_WEIGHT;
    (base, unit(score))
}

/// Everything [`decide`] looks at.
#[derive(Debug, Clone)]
pub struct ScoreCard<'a> {
    pub safety: f64,
    pub performance: f64,
    pub ethics: f64,
    pub overall: f64,
    pub rollback_ready: bool,
    pub risk: &'a RiskAssessment,
    /// Names of individual checks scoring below their dimension threshold.
    pub dissent: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub result: ValidationResult,
    pub conditions: Vec<String>,
    pub hard_rejections: Vec<String>,
}

/// Individual checks scoring below their dimension's threshold.
pub fn dissenting_checks<'a>(
    checks: impl IntoIterator<Item = &'a CheckScore>,
    criteria: &ValidationCriteria,
) -> Vec<String> {
    checks
        .into_iter()
        .filter(|c| {
            let threshold = match c.kind {
                CheckKind::Safety => criteria.safety_threshold,
                CheckKind::Performance => criteria.performance_threshold,
                CheckKind::Ethics => criteria.ethics_threshold,
            };
            c.score < threshold
        })
        .map(|c| c.name.clone())
        .collect()
}

/// Turn a score card into a verdict.
///
/// Hard rejections (safety or ethics below threshold, or a missing undo path
/// where one is required) win over any composite score.
pub fn decide(card: &ScoreCard<'_>, criteria: &ValidationCriteria, policy: &CategoryPolicy) -> Verdict {
    let mut hard_rejections = Vec::new();
    if card.safety < criteria.safety_threshold {
        hard_rejections.push(format!(
            "safety score {:.2} below threshold {:.2}",
            card.safety, criteria.safety_threshold
        ));
    }
    if card.ethics < criteria.ethics_threshold {
        hard_rejections.push(format!(
            "ethics score {:.2} below threshold {:.2}",
            card.ethics, criteria.ethics_threshold
        ));
    }
    if !card.rollback_ready && (criteria.rollback_requirement || policy.rollback_critical) {
        hard_rejections.push("no working rollback path was demonstrated".to_string());
    }
    if !hard_rejections.is_empty() {
        return Verdict {
            result: ValidationResult::Rejected,
            conditions: Vec::new(),
            hard_rejections,
        };
    }

    let mut result = if card.overall >= APPROVE_AT {
        ValidationResult::Approved
    } else if card.overall >= CONDITIONAL_AT {
        ValidationResult::Conditional
    } else if card.overall >= REVIEW_AT {
        ValidationResult::RequiresReview
    } else {
        ValidationResult::Rejected
    };

    let mut conditions = Vec::new();
    if result == ValidationResult::Conditional {
        if card.performance < criteria.performance_threshold {
            conditions.push(format!(
                "raise performance score from {:.2} to at least {:.2}",
                card.performance, criteria.performance_threshold
            ));
        }
        if !card.rollback_ready {
            conditions.push("demonstrate a working rollback path before merging".to_string());
        }
    }
    if card.risk.exceeds_tolerance
        && matches!(result, ValidationResult::Approved | ValidationResult::Conditional)
    {
        result = ValidationResult::Conditional;
        conditions.push(format!(
            "apply risk mitigations: risk level {:.2} exceeds tolerance {:.2}",
            card.risk.risk_level, card.risk.tolerance
        ));
    }
    if result == ValidationResult::Approved && criteria.approval_consensus && !card.dissent.is_empty() {
        result = ValidationResult::Conditional;
        conditions.push(format!(
            "consensus not reached; dissenting checks: {}",
            card.dissent.join(", ")
        ));
    }
    if result == ValidationResult::Conditional && conditions.is_empty() {
        conditions.push(format!(
            "overall score {:.2} is below {:.2}; monitor closely after merge",
            card.overall, APPROVE_AT
        ));
    }

    Verdict {
        result,
        conditions,
        hard_rejections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn score(name: &str, kind: CheckKind, score: f64) -> CheckScore {
        CheckScore {
            name: name.to_string(),
            kind,
            score,
            degraded: None,
        }
    }

    fn card(safety: f64, performance: f64, ethics: f64, overall: f64, risk: &RiskAssessment) -> ScoreCard<'_> {
        ScoreCard {
            safety,
            performance,
            ethics,
            overall,
            rollback_ready: true,
            risk,
            dissent: Vec::new(),
        }
    }

    #[test]
    fn test_empty_dimension_is_neutral() {
        assert_eq!(average(&[]), EMPTY_DIMENSION_SCORE);
    }

    #[test]
    fn test_multipliers() {
        let checks = vec![score("a", CheckKind::Safety, 0.9)];
        let high = CategoryPolicy {
            high_risk: true,
            ..CategoryPolicy::default()
        };
        let (s, m) = safety_score(&checks, &high);
        assert_eq!(m, HIGH_RISK_SAFETY_MULTIPLIER);
        assert!((s - 0.855).abs() < 1e-9);

        let ethics = vec![score("e", CheckKind::Ethics, 0.95)];
        let (e, _) = ethics_score(&ethics, ChangeCategory::EthicalFramework);
        assert_eq!(e, 1.0);
    }

    #[test]
    fn test_performance_bonus_is_capped() {
        let benefits = vec![
            "Faster recall".to_string(),
            "Lower latency".to_string(),
            "Higher throughput".to_string(),
            "Clearer logs".to_string(),
        ];
        assert!((performance_bonus(&benefits) - 0.2).abs() < 1e-9);
        assert_eq!(performance_bonus(&["Clearer logs".to_string()]), 0.0);
    }

    #[test]
    fn test_thresholds_map_to_results() {
        let risk = RiskAssessment::default();
        let criteria = ValidationCriteria::default();
        let policy = CategoryPolicy::default();
        let at = |overall: f64| decide(&card(0.9, 0.8, 0.95, overall, &risk), &criteria, &policy).result;
        assert_eq!(at(0.85), ValidationResult::Approved);
        assert_eq!(at(0.7), ValidationResult::Conditional);
        assert_eq!(at(0.5), ValidationResult::RequiresReview);
        assert_eq!(at(0.2), ValidationResult::Rejected);
    }

    #[test]
    fn test_conditional_lists_unmet_sub_thresholds() {
        let risk = RiskAssessment::default();
        let criteria = ValidationCriteria::default();
        let verdict = decide(&card(0.9, 0.5, 0.95, 0.7, &risk), &criteria, &CategoryPolicy::default());
        assert_eq!(verdict.result, ValidationResult::Conditional);
        assert_eq!(verdict.conditions.len(), 1);
        assert!(verdict.conditions[0].contains("performance"));
    }

    #[test]
    fn test_risk_over_tolerance_caps_approval() {
        let risk = RiskAssessment {
            risk_level: 0.5,
            tolerance: 0.3,
            exceeds_tolerance: true,
            ..RiskAssessment::default()
        };
        let verdict = decide(
            &card(0.95, 0.95, 0.95, 0.95, &risk),
            &ValidationCriteria::default(),
            &CategoryPolicy::default(),
        );
        assert_eq!(verdict.result, ValidationResult::Conditional);
        assert!(verdict.conditions.iter().any(|c| c.contains("mitigations")));
    }

    #[test]
    fn test_consensus_dissent_downgrades() {
        let risk = RiskAssessment::default();
        let criteria = ValidationCriteria {
            approval_consensus: true,
            ..ValidationCriteria::default()
        };
        let mut c = card(0.9, 0.9, 0.95, 0.9, &risk);
        c.dissent = dissenting_checks(&[score("fairness", CheckKind::Ethics, 0.85)], &criteria);
        assert_eq!(c.dissent, vec!["fairness".to_string()]);
        let verdict = decide(&c, &criteria, &CategoryPolicy::default());
        assert_eq!(verdict.result, ValidationResult::Conditional);
    }

    #[test]
    fn test_rollback_critical_category_rejects_without_undo() {
        let risk = RiskAssessment::default();
        let criteria = ValidationCriteria {
            rollback_requirement: false,
            ..ValidationCriteria::default()
        };
        let mut c = card(0.95, 0.95, 0.95, 0.9, &risk);
        c.rollback_ready = false;
        let lenient = decide(&c, &criteria, &CategoryPolicy::default());
        assert_ne!(lenient.result, ValidationResult::Rejected);

        let critical = CategoryPolicy {
            rollback_critical: true,
            ..CategoryPolicy::default()
        };
        let strict = decide(&c, &criteria, &critical);
        assert_eq!(strict.result, ValidationResult::Rejected);
        assert_eq!(strict.hard_rejections.len(), 1);
    }

    proptest! {
        #[test]
        fn composite_is_bounded(
            s in -1.0f64..2.0,
            p in -1.0f64..2.0,
            e in -1.0f64..2.0,
            risk in -1.0f64..2.0,
            ready in any::<bool>(),
            critical in any::<bool>(),
        ) {
            let level = if critical { ValidationLevel::Critical } else { ValidationLevel::Standard };
            let (base, overall) = composite(s, p, e, level, ready, risk);
            prop_assert!((0.0..=1.0).contains(&base));
            prop_assert!((0.0..=1.0).contains(&overall));
        }

        #[test]
        fn low_safety_is_always_rejected(
            safety in 0.0f64..0.79,
            performance in 0.0f64..=1.0,
            ethics in 0.0f64..=1.0,
            overall in 0.0f64..=1.0,
            ready in any::<bool>(),
        ) {
            let risk = RiskAssessment::default();
            let mut c = card(safety, performance, ethics, overall, &risk);
            c.rollback_ready = ready;
            let verdict = decide(&c, &ValidationCriteria::default(), &CategoryPolicy::default());
            prop_assert_eq!(verdict.result, ValidationResult::Rejected);
        }

        #[test]
        fn low_ethics_is_always_rejected(
            safety in 0.0f64..=1.0,
            performance in 0.0f64..=1.0,
            ethics in 0.0f64..0.89,
            overall in 0.0f64..=1.0,
            ready in any::<bool>(),
            consensus in any::<bool>(),
        ) {
            let risk = RiskAssessment::default();
            let mut c = card(safety, performance, ethics, overall, &risk);
            c.rollback_ready = ready;
            let criteria = ValidationCriteria {
                approval_consensus: consensus,
                ..ValidationCriteria::default()
            };
            let verdict = decide(&c, &criteria, &CategoryPolicy::default());
            prop_assert_eq!(verdict.result, ValidationResult::Rejected);
            prop_assert!(verdict.hard_rejections.iter().any(|r| r.contains("ethics")));
        }

        #[test]
        fn missing_required_rollback_is_always_rejected(
            safety in 0.0f64..=1.0,
            performance in 0.0f64..=1.0,
            ethics in 0.0f64..=1.0,
            overall in 0.0f64..=1.0,
        ) {
            let risk = RiskAssessment::default();
            let mut c = card(safety, performance, ethics, overall, &risk);
            c.rollback_ready = false;
            let verdict = decide(&c, &ValidationCriteria::default(), &CategoryPolicy::default());
            prop_assert_eq!(verdict.result, ValidationResult::Rejected);
            prop_assert!(verdict.hard_rejections.iter().any(|r| r.contains("rollback")));
        }
    }
}
