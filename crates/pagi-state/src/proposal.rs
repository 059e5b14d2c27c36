//! Change proposals produced by the upstream reflection process.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Area of the agent's persisted state a proposal targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    MemoryOrganization,
    LearningStrategy,
    DecisionMaking,
    EthicalFramework,
    ConflictResolution,
    CuriosityExploration,
    MetaLearning,
    SystemConfiguration,
}

impl ChangeCategory {
    pub fn all() -> [Self; 8] {
        [
            ChangeCategory::MemoryOrganization,
            ChangeCategory::LearningStrategy,
            ChangeCategory::DecisionMaking,
            ChangeCategory::EthicalFramework,
            ChangeCategory::ConflictResolution,
            ChangeCategory::CuriosityExploration,
            ChangeCategory::MetaLearning,
            ChangeCategory::SystemConfiguration,
        ]
    }

    /// Stable snake_case tag, also used as the change type when a proposal is logged into a shadow.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::MemoryOrganization => "memory_organization",
            ChangeCategory::LearningStrategy => "learning_strategy",
            ChangeCategory::DecisionMaking => "decision_making",
            ChangeCategory::EthicalFramework => "ethical_framework",
            ChangeCategory::ConflictResolution => "conflict_resolution",
            ChangeCategory::CuriosityExploration => "curiosity_exploration",
            ChangeCategory::MetaLearning => "meta_learning",
            ChangeCategory::SystemConfiguration => "system_configuration",
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A structured, scored candidate modification with declared risks and benefits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub id: String,
    /// Which upstream process produced the proposal (e.g. `reflection_loop`).
    pub source: String,
    pub category: ChangeCategory,
    pub description: String,
    /// Key → new value. Ordered so that logging into a shadow is deterministic.
    #[serde(default)]
    pub proposed_modifications: serde_json::Map<String, Value>,
    #[serde(default)]
    pub expected_benefits: Vec<String>,
    /// Free-text risk descriptions.
    #[serde(default)]
    pub potential_risks: Vec<String>,
    /// Proposer's confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub priority: Priority,
}

impl ChangeProposal {
    pub fn new(
        source: impl Into<String>,
        category: ChangeCategory,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: format!("proposal_{}", Uuid::new_v4().simple()),
            source: source.into(),
            category,
            description: description.into(),
            proposed_modifications: serde_json::Map::new(),
            expected_benefits: Vec::new(),
            potential_risks: Vec::new(),
            confidence,
            priority: Priority::default(),
        }
    }

    pub fn with_modification(mut self, key: impl Into<String>, value: Value) -> Self {
        self.proposed_modifications.insert(key.into(), value);
        self
    }

    pub fn with_benefit(mut self, benefit: impl Into<String>) -> Self {
        self.expected_benefits.push(benefit.into());
        self
    }

    pub fn with_risk(mut self, risk: impl Into<String>) -> Self {
        self.potential_risks.push(risk.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Confidence clamped to [0, 1]; non-finite values count as zero confidence.
    pub fn bounded_confidence(&self) -> f64 {
        if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Lower-cased text the keyword checks scan: description, modification keys and values.
    pub fn searchable_text(&self) -> String {
        let mut text = self.description.to_lowercase();
        for (key, value) in &self.proposed_modifications {
            text.push(' ');
            text.push_str(&key.to_lowercase());
            text.push(' ');
            text.push_str(&value.to_string().to_lowercase());
        }
        text
    }
}
