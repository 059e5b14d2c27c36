//! Shadow pipeline configuration.
//!
//! Layered with the `config` crate: serde defaults → optional file → environment.
//!
//! | Source | Default | Description |
//! |--------|---------|-------------|
//! | PAGI_SHADOW_CONFIG | config/shadow | Config file path (extension optional: .toml). |
//! | PAGI_SHADOW__SHADOW_ROOT | ./data/pagi_shadows | Directory holding private shadow copies. |
//! | PAGI_SHADOW__DEFAULT_MAX_DURATION_HOURS | 24 | Lifetime of a shadow before it is considered expired. |
//! | PAGI_SHADOW__SWEEP_INTERVAL_SECS | 300 | Expiry sweeper cadence (minimum 30). |
//! | PAGI_SHADOW__CLEANUP_TIMEOUT_MS | 5000 | How long cleanup waits for an in-flight operation. |
//! | PAGI_SHADOW__SAFETY_THRESHOLD etc. | 0.8 / 0.7 / 0.9 | Seeds for `ValidationCriteria::from_config`. |

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

const DEFAULT_CONFIG_PATH: &str = "config/shadow";
const MIN_SWEEP_INTERVAL_SECS: u64 = 30;

fn default_shadow_root() -> PathBuf {
    PathBuf::from("./data/pagi_shadows")
}

fn default_max_duration_hours() -> f64 {
    24.0
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_cleanup_timeout_ms() -> u64 {
    5000
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

fn default_true() -> bool {
    true
}

fn default_max_simultaneous_changes() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default = "default_shadow_root")]
    pub shadow_root: PathBuf,
    #[serde(default = "default_max_duration_hours")]
    pub default_max_duration_hours: f64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: u64,
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: f64,
    #[serde(default = "default_performance_threshold")]
    pub performance_threshold: f64,
    #[serde(default = "default_ethics_threshold")]
    pub ethics_threshold: f64,
    #[serde(default = "default_true")]
    pub rollback_requirement: bool,
    #[serde(default = "default_max_simultaneous_changes")]
    pub max_simultaneous_changes: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            shadow_root: default_shadow_root(),
            default_max_duration_hours: default_max_duration_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            cleanup_timeout_ms: default_cleanup_timeout_ms(),
            safety_threshold: default_safety_threshold(),
            performance_threshold: default_performance_threshold(),
            ethics_threshold: default_ethics_threshold(),
            rollback_requirement: true,
            max_simultaneous_changes: default_max_simultaneous_changes(),
        }
    }
}

impl EvolutionConfig {
    /// Load from `PAGI_SHADOW_CONFIG` (or `config/shadow`) and `PAGI_SHADOW__*` environment variables.
    pub fn load() -> Result<Self, StateError> {
        let path = std::env::var("PAGI_SHADOW_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from a specific file (missing file is fine) plus the environment.
    pub fn load_from(path: &str) -> Result<Self, StateError> {
        let built = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("PAGI_SHADOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let loaded: Self = built.try_deserialize()?;
        Ok(loaded.normalized())
    }

    /// Clamp out-of-range values instead of rejecting the whole configuration.
    pub fn normalized(mut self) -> Self {
        self.sweep_interval_secs = self.sweep_interval_secs.max(MIN_SWEEP_INTERVAL_SECS);
        self.safety_threshold = clamp_unit(self.safety_threshold, default_safety_threshold());
        self.performance_threshold = clamp_unit(self.performance_threshold, default_performance_threshold());
        self.ethics_threshold = clamp_unit(self.ethics_threshold, default_ethics_threshold());
        if !self.default_max_duration_hours.is_finite() || self.default_max_duration_hours <= 0.0 {
            self.default_max_duration_hours = default_max_duration_hours();
        }
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(MIN_SWEEP_INTERVAL_SECS))
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}
