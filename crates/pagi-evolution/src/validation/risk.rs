//! Risk categorization and scoring over a proposal's declared risks.

use pagi_state::{ChangeProposal, RiskAssessment, RiskCategory, RiskItem};

use super::scoring::unit;

const CONFIDENCE_PENALTY_WEIGHT: f64 = 0.2;

// Checked in order; the first match wins.
const CATEGORY_KEYWORDS: &[(RiskCategory, &[&str])] = &[
    (
        RiskCategory::Safety,
        &["safety", "unsafe", "crash", "corrupt", "data loss", "instab", "unstable"],
    ),
    (
        RiskCategory::Ethical,
        &["ethic", "bias", "fair", "harm", "privacy", "value", "moral"],
    ),
    (
        RiskCategory::Performance,
        &["performance", "slow", "latency", "throughput", "memory usage", "cpu", "resource"],
    ),
];

pub fn categorize(risk: &str) -> RiskCategory {
    let text = risk.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(RiskCategory::Operational)
}

/// critical/severe 0.8, moderate 0.5, minor/low 0.2, otherwise 0.4.
///
/// Severity terms match whole words only, so "slowdown" or "allow" are not "low".
pub fn severity(risk: &str) -> f64 {
    let text = risk.to_lowercase();
    let has = |terms: &[&str]| {
        text.split(|c: char| !c.is_alphanumeric())
            .any(|word| terms.contains(&word))
    };
    if has(&["critical", "critically", "severe", "severely"]) {
        0.8
    } else if has(&["moderate", "moderately"]) {
        0.5
    } else if has(&["minor", "low"]) {
        0.2
    } else {
        0.4
    }
}

/// Score every declared risk and compare the overall level to `tolerance`.
pub fn assess(proposal: &ChangeProposal, tolerance: f64) -> RiskAssessment {
    let items: Vec<RiskItem> = proposal
        .potential_risks
        .iter()
        .map(|risk| RiskItem {
            description: risk.clone(),
            category: categorize(risk),
            severity: severity(risk),
        })
        .collect();
    let mean_severity = if items.is_empty() {
        0.0
    } else {
        items.iter().map(|i| i.severity).sum::<f64>() / items.len() as f64
    };
    let confidence_penalty = (1.0 - proposal.bounded_confidence()) * CONFIDENCE_PENALTY_WEIGHT;
    let risk_level = unit(mean_severity + confidence_penalty);
    let exceeds_tolerance = risk_level > tolerance;
    let mitigations = if exceeds_tolerance {
        mitigations(&items)
    } else {
        Vec::new()
    };
    RiskAssessment {
        items,
        mean_severity,
        confidence_penalty,
        risk_level,
        tolerance,
        exceeds_tolerance,
        mitigations,
    }
}

/// One strategy per distinct risk category, in first-seen order.
pub fn mitigations(items: &[RiskItem]) -> Vec<String> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item.category) {
            seen.push(item.category);
        }
    }
    if seen.is_empty() {
        return vec![
            "Raise proposal confidence with additional shadow experiments before merging".to_string(),
        ];
    }
    seen.into_iter()
        .map(|category| match category {
            RiskCategory::Safety => {
                "Stage the change behind a verified rollback point and monitor integrity checks after merge"
            }
            RiskCategory::Ethical => {
                "Require review of the change against the ethical framework before it reaches live state"
            }
            RiskCategory::Performance => {
                "Benchmark in the shadow and define a performance regression threshold that triggers rollback"
            }
            RiskCategory::Operational => {
                "Merge during a low-activity window with the previous state snapshot retained"
            }
        })
        .map(str::to_string)
        .collect()
}
