//! Running aggregates over every validation the engine has performed.

use std::collections::BTreeMap;

use pagi_state::{ChangeCategory, ValidationReport, ValidationResult};
use serde::{Deserialize, Serialize};

/// Aggregate view over every report the engine has produced.
///
/// Updated incrementally, so it covers reports that have already rotated out
/// of the engine's bounded history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    pub total: usize,
    pub approved: usize,
    pub conditional: usize,
    pub requires_review: usize,
    pub rejected: usize,
    pub approval_rate: f64,
    pub mean_overall_score: f64,
    pub mean_safety_score: f64,
    pub mean_performance_score: f64,
    pub mean_ethics_score: f64,
    pub category_distribution: BTreeMap<ChangeCategory, usize>,
}

impl ValidationStatistics {
    pub fn from_reports(reports: &[ValidationReport]) -> Self {
        let mut stats = Self::default();
        for report in reports {
            stats.record(report);
        }
        stats
    }

    /// Fold one more report into the aggregates.
    pub fn record(&mut self, report: &ValidationReport) {
        self.total += 1;
        match report.result {
            ValidationResult::Approved => self.approved += 1,
            ValidationResult::Conditional => self.conditional += 1,
            ValidationResult::RequiresReview => self.requires_review += 1,
            ValidationResult::Rejected => self.rejected += 1,
        }
        *self.category_distribution.entry(report.category).or_default() += 1;

        let n = self.total as f64;
        let step = |mean: &mut f64, x: f64| *mean += (x - *mean) / n;
        step(&mut self.mean_overall_score, report.overall_score);
        step(&mut self.mean_safety_score, report.safety_score);
        step(&mut self.mean_performance_score, report.performance_score);
        step(&mut self.mean_ethics_score, report.ethics_score);
        self.approval_rate = self.approved as f64 / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pagi_state::ValidationDetails;

    fn report(category: ChangeCategory, result: ValidationResult, overall: f64) -> ValidationReport {
        ValidationReport {
            change_id: "p".to_string(),
            category,
            result,
            overall_score: overall,
            safety_score: 0.9,
            performance_score: 0.8,
            ethics_score: 1.0,
            risk_level: 0.1,
            rollback_ready: true,
            rollback_required: true,
            details: ValidationDetails::default(),
            recommendations: Vec::new(),
            conditions: Vec::new(),
            validated_at: Utc::now(),
            approval_timestamp: None,
        }
    }

    #[test]
    fn test_empty_history() {
        let stats = ValidationStatistics::from_reports(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.approval_rate, 0.0);
    }

    #[test]
    fn test_counts_and_means() {
        let stats = ValidationStatistics::from_reports(&[
            report(ChangeCategory::MetaLearning, ValidationResult::Approved, 0.9),
            report(ChangeCategory::MetaLearning, ValidationResult::Rejected, 0.3),
            report(ChangeCategory::DecisionMaking, ValidationResult::Conditional, 0.6),
            report(ChangeCategory::DecisionMaking, ValidationResult::Approved, 0.8),
        ]);
        assert_eq!(stats.total, 4);
        assert_eq!((stats.approved, stats.conditional, stats.rejected), (2, 1, 1));
        assert_eq!(stats.approval_rate, 0.5);
        assert!((stats.mean_overall_score - 0.65).abs() < 1e-9);
        assert_eq!(stats.category_distribution[&ChangeCategory::MetaLearning], 2);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let reports = [
            report(ChangeCategory::MetaLearning, ValidationResult::Approved, 0.9),
            report(ChangeCategory::LearningStrategy, ValidationResult::RequiresReview, 0.45),
            report(ChangeCategory::MetaLearning, ValidationResult::Rejected, 0.2),
        ];
        let mut running = ValidationStatistics::default();
        for r in &reports {
            running.record(r);
        }
        let batch = ValidationStatistics::from_reports(&reports);
        assert_eq!(running.total, batch.total);
        assert_eq!(running.requires_review, 1);
        assert!((running.mean_overall_score - 0.5166666666666667).abs() < 1e-9);
        assert!((running.approval_rate - 1.0 / 3.0).abs() < 1e-9);
    }
}
