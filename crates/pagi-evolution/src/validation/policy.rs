//! Per-category policy lookup.

use std::collections::HashMap;

use pagi_state::ChangeCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    /// Safety score is damped (×0.95) for high-risk categories.
    pub high_risk: bool,
    /// A missing undo path is a hard rejection regardless of criteria.
    pub rollback_critical: bool,
    pub max_risk_tolerance: f64,
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self {
            high_risk: false,
            rollback_critical: false,
            max_risk_tolerance: 0.3,
        }
    }
}

/// | Category | High risk | Rollback critical | Risk tolerance |
/// |----------|-----------|-------------------|----------------|
/// | memory_organization | yes | yes | 0.3 |
/// | learning_strategy | | | 0.4 |
/// | decision_making | | | 0.3 |
/// | ethical_framework | yes | yes | 0.2 |
/// | conflict_resolution | | | 0.35 |
/// | curiosity_exploration | | | 0.5 |
/// | meta_learning | | | 0.3 |
/// | system_configuration | | yes | 0.25 |
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<ChangeCategory, CategoryPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        use ChangeCategory::*;
        let rows = [
            (MemoryOrganization, true, true, 0.3),
            (LearningStrategy, false, false, 0.4),
            (DecisionMaking, false, false, 0.3),
            (EthicalFramework, true, true, 0.2),
            (ConflictResolution, false, false, 0.35),
            (CuriosityExploration, false, false, 0.5),
            (MetaLearning, false, false, 0.3),
            (SystemConfiguration, false, true, 0.25),
        ];
        Self {
            policies: rows
                .into_iter()
                .map(|(category, high_risk, rollback_critical, max_risk_tolerance)| {
                    (
                        category,
                        CategoryPolicy {
                            high_risk,
                            rollback_critical,
                            max_risk_tolerance,
                        },
                    )
                })
                .collect(),
        }
    }
}

impl PolicyTable {
    pub fn get(&self, category: ChangeCategory) -> CategoryPolicy {
        self.policies.get(&category).copied().unwrap_or_default()
    }

    pub fn with_policy(mut self, category: ChangeCategory, policy: CategoryPolicy) -> Self {
        self.policies.insert(category, policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_covers_every_category() {
        let table = PolicyTable::default();
        for category in ChangeCategory::all() {
            let policy = table.get(category);
            assert!(policy.max_risk_tolerance > 0.0 && policy.max_risk_tolerance <= 0.5);
        }
        assert!(table.get(ChangeCategory::EthicalFramework).high_risk);
        assert!(table.get(ChangeCategory::SystemConfiguration).rollback_critical);
        assert!(!table.get(ChangeCategory::CuriosityExploration).rollback_critical);
    }

    #[test]
    fn test_override() {
        let table = PolicyTable::default().with_policy(
            ChangeCategory::MetaLearning,
            CategoryPolicy {
                max_risk_tolerance: 0.1,
                ..CategoryPolicy::default()
            },
        );
        assert_eq!(table.get(ChangeCategory::MetaLearning).max_risk_tolerance, 0.1);
    }
}
