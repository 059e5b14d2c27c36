//! Validation criteria and the scored verdict that gates a merge.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EvolutionConfig;
use crate::proposal::ChangeCategory;

/// How thorough a validation pass is. `Critical` damps the composite score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Basic,
    #[default]
    Standard,
    Comprehensive,
    Critical,
}

impl std::str::FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(ValidationLevel::Basic),
            "standard" => Ok(ValidationLevel::Standard),
            "comprehensive" => Ok(ValidationLevel::Comprehensive),
            "critical" => Ok(ValidationLevel::Critical),
            other => Err(format!("unknown validation level '{}'", other)),
        }
    }
}

/// Thresholds and switches a proposal is gated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCriteria {
    #[serde(default)]
    pub level: ValidationLevel,
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: f64,
    #[serde(default = "default_performance_threshold")]
    pub performance_threshold: f64,
    #[serde(default = "default_ethics_threshold")]
    pub ethics_threshold: f64,
    /// A proposal without a working undo path is rejected.
    #[serde(default = "default_true")]
    pub rollback_requirement: bool,
    /// Every individual check must clear its dimension threshold for an approval.
    #[serde(default)]
    pub approval_consensus: bool,
    #[serde(default = "default_max_simultaneous_changes")]
    pub max_simultaneous_changes: usize,
}

fn default_true() -> bool {
    true
}

fn default_safety_threshold() -> f64 {
    0.8
}

fn default_performance_threshold() -> f64 {
    0.7
}

fn default_ethics_threshold() -> f64 {
    0.9
}

fn default_max_simultaneous_changes() -> usize {
    10
}

impl Default for ValidationCriteria {
    fn default() -> Self {
        Self {
            level: ValidationLevel::Standard,
            safety_threshold: default_safety_threshold(),
            performance_threshold: default_performance_threshold(),
            ethics_threshold: default_ethics_threshold(),
            rollback_requirement: true,
            approval_consensus: false,
            max_simultaneous_changes: default_max_simultaneous_changes(),
        }
    }
}

impl ValidationCriteria {
    /// Preset criteria for a validation level, on top of the default thresholds.
    ///
    /// | Level | Safety | Performance | Ethics | Rollback | Consensus |
    /// |-------|--------|-------------|--------|----------|-----------|
    /// | basic | 0.7 | 0.6 | 0.8 | no | no |
    /// | standard | 0.8 | 0.7 | 0.9 | yes | no |
    /// | comprehensive | 0.8 | 0.7 | 0.9 | yes | yes |
    /// | critical | 0.8 | 0.7 | 0.9 | yes | yes |
    ///
    /// `critical` keeps the standard thresholds; its extra strictness is the
    /// damping applied to the composite score.
    pub fn for_level(level: ValidationLevel) -> Self {
        Self::default().at_level(level)
    }

    /// Overlay a validation level on these criteria.
    ///
    /// `basic` relaxes every threshold by 0.1 and drops the rollback requirement;
    /// `comprehensive` and `critical` require consensus, and `critical` forces rollback.
    pub fn at_level(self, level: ValidationLevel) -> Self {
        match level {
            ValidationLevel::Basic => Self {
                level,
                safety_threshold: relax(self.safety_threshold),
                performance_threshold: relax(self.performance_threshold),
                ethics_threshold: relax(self.ethics_threshold),
                rollback_requirement: false,
                ..self
            },
            ValidationLevel::Standard => Self { level, ..self },
            ValidationLevel::Comprehensive => Self {
                level,
                approval_consensus: true,
                ..self
            },
            ValidationLevel::Critical => Self {
                level,
                rollback_requirement: true,
                approval_consensus: true,
                ..self
            },
        }
    }

    /// Standard-level criteria seeded from configured thresholds.
    pub fn from_config(config: &EvolutionConfig) -> Self {
        Self {
            safety_threshold: config.safety_threshold,
            performance_threshold: config.performance_threshold,
            ethics_threshold: config.ethics_threshold,
            rollback_requirement: config.rollback_requirement,
            max_simultaneous_changes: config.max_simultaneous_changes,
            ..Self::default()
        }
    }
}

fn relax(threshold: f64) -> f64 {
    ((threshold - 0.1) * 100.0).round() / 100.0
}

/// Verdict of a validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResult {
    Approved,
    Conditional,
    RequiresReview,
    Rejected,
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Approved => write!(f, "APPROVED"),
            ValidationResult::Conditional => write!(f, "CONDITIONAL"),
            ValidationResult::RequiresReview => write!(f, "REQUIRES_REVIEW"),
            ValidationResult::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Which assessment a check contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Safety,
    Performance,
    Ethics,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Safety => write!(f, "safety"),
            CheckKind::Performance => write!(f, "performance"),
            CheckKind::Ethics => write!(f, "ethics"),
        }
    }
}

/// Score of one check. `degraded` is set when the check failed and a conservative score was used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckScore {
    pub name: String,
    pub kind: CheckKind,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Performance,
    Safety,
    Ethical,
    Operational,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Performance => write!(f, "performance"),
            RiskCategory::Safety => write!(f, "safety"),
            RiskCategory::Ethical => write!(f, "ethical"),
            RiskCategory::Operational => write!(f, "operational"),
        }
    }
}

/// One declared risk after categorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub description: String,
    pub category: RiskCategory,
    pub severity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub items: Vec<RiskItem>,
    pub mean_severity: f64,
    /// (1 - confidence) * 0.2
    pub confidence_penalty: f64,
    pub risk_level: f64,
    /// The category's maximum risk tolerance.
    pub tolerance: f64,
    pub exceeds_tolerance: bool,
    #[serde(default)]
    pub mitigations: Vec<String>,
}

/// Structured breakdown of how a report's scores were reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub safety_checks: Vec<CheckScore>,
    pub performance_checks: Vec<CheckScore>,
    pub performance_bonus: f64,
    pub ethics_checks: Vec<CheckScore>,
    /// Multiplier applied to the averaged safety score (0.95 for high-risk categories).
    pub safety_multiplier: f64,
    /// Multiplier applied to the averaged ethics score (1.1 for ethical-framework proposals).
    pub ethics_multiplier: f64,
    pub risk: RiskAssessment,
    /// Mean of safety/performance/ethics before rollback and risk adjustments.
    pub composite_base: f64,
    /// Reasons for a hard rejection, independent of the composite score.
    #[serde(default)]
    pub hard_rejections: Vec<String>,
}

/// The scored verdict gating whether a proposal may be merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub change_id: String,
    pub category: ChangeCategory,
    pub result: ValidationResult,
    pub overall_score: f64,
    pub safety_score: f64,
    pub performance_score: f64,
    pub ethics_score: f64,
    pub risk_level: f64,
    pub rollback_ready: bool,
    /// Copied from the criteria so the merge step can enforce it.
    pub rollback_required: bool,
    pub details: ValidationDetails,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Only populated for `Conditional` results.
    #[serde(default)]
    pub conditions: Vec<String>,
    pub validated_at: DateTime<Utc>,
    /// Only set when the result is `Approved`.
    #[serde(default)]
    pub approval_timestamp: Option<DateTime<Utc>>,
}

impl ValidationReport {
    pub fn is_approved(&self) -> bool {
        self.result == ValidationResult::Approved
    }

    /// True unless rollback was required and not demonstrated.
    pub fn rollback_satisfied(&self) -> bool {
        !self.rollback_required || self.rollback_ready
    }

    /// Change the verdict, keeping `conditions` and `approval_timestamp` consistent with it.
    pub fn set_result(&mut self, result: ValidationResult) {
        self.result = result;
        if result == ValidationResult::Approved {
            self.approval_timestamp.get_or_insert_with(Utc::now);
        } else {
            self.approval_timestamp = None;
        }
        if result != ValidationResult::Conditional {
            self.conditions.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let c = ValidationCriteria::default();
        assert_eq!(c.safety_threshold, 0.8);
        assert_eq!(c.performance_threshold, 0.7);
        assert_eq!(c.ethics_threshold, 0.9);
        assert_eq!(c.level, ValidationLevel::Standard);
    }

    #[test]
    fn test_level_presets() {
        let critical = ValidationCriteria::for_level(ValidationLevel::Critical);
        assert_eq!(critical.safety_threshold, ValidationCriteria::default().safety_threshold);
        assert_eq!(critical.ethics_threshold, ValidationCriteria::default().ethics_threshold);
        assert!(critical.rollback_requirement);
        assert!(critical.approval_consensus);

        let basic = ValidationCriteria::for_level(ValidationLevel::Basic);
        assert!(!basic.rollback_requirement);
        assert_eq!(basic.level, ValidationLevel::Basic);
        assert_eq!(
            (basic.safety_threshold, basic.performance_threshold, basic.ethics_threshold),
            (0.7, 0.6, 0.8)
        );
    }

    #[test]
    fn test_configured_thresholds_survive_level_overlay() {
        let config = EvolutionConfig {
            safety_threshold: 0.85,
            ethics_threshold: 0.95,
            rollback_requirement: false,
            max_simultaneous_changes: 3,
            ..EvolutionConfig::default()
        };
        let critical = ValidationCriteria::from_config(&config).at_level(ValidationLevel::Critical);
        assert_eq!(critical.level, ValidationLevel::Critical);
        assert_eq!(critical.safety_threshold, 0.85);
        assert_eq!(critical.ethics_threshold, 0.95);
        assert_eq!(critical.max_simultaneous_changes, 3);
        assert!(critical.rollback_requirement);

        let standard = ValidationCriteria::from_config(&config).at_level(ValidationLevel::Standard);
        assert!(!standard.rollback_requirement);
        assert_eq!(standard.safety_threshold, 0.85);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("Critical".parse::<ValidationLevel>().unwrap(), ValidationLevel::Critical);
        assert!("extreme".parse::<ValidationLevel>().is_err());
    }

    #[test]
    fn test_criteria_partial_json() {
        let c: ValidationCriteria = serde_json::from_str(r#"{"level":"basic","safety_threshold":0.5}"#).unwrap();
        assert_eq!(c.safety_threshold, 0.5);
        assert_eq!(c.ethics_threshold, 0.9);
        assert!(c.rollback_requirement);
    }
}
