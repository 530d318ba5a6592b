//! Scaling rules and their invariants.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fully-resolved scaling rule for one service.
///
/// Invariants (checked by [`ScalingRule::validate`]):
/// `low_watermark < high_watermark`, `max_replicas >= min_replicas`,
/// `step >= 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    /// Metric the watermarks apply to, e.g. `cpu`.
    pub metric: String,
    /// Scale up when the sampled value is strictly above this.
    pub high_watermark: f64,
    /// Scale down when the sampled value is strictly below this.
    pub low_watermark: f64,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Replica delta applied per scaling action.
    pub step: u32,
    /// Minimum time between same-direction scaling actions.
    pub cooldown_secs: u64,
}

impl ScalingRule {
    pub fn validate(&self) -> Result<(), RuleViolation> {
        if self.low_watermark >= self.high_watermark {
            return Err(RuleViolation::WatermarkOrder {
                low: self.low_watermark,
                high: self.high_watermark,
            });
        }
        if self.max_replicas < self.min_replicas {
            return Err(RuleViolation::ReplicaBounds {
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }
        if self.step == 0 {
            return Err(RuleViolation::ZeroStep);
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for ScalingRule {
    fn default() -> Self {
        Self {
            metric: "cpu".to_string(),
            high_watermark: 80.0,
            low_watermark: 30.0,
            min_replicas: 1,
            max_replicas: 10,
            step: 1,
            cooldown_secs: 300,
        }
    }
}

/// A scaling rule that violates the data-model invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleViolation {
    #[error("low watermark {low} must be strictly below high watermark {high}")]
    WatermarkOrder { low: f64, high: f64 },

    #[error("max replicas {max} must be at least min replicas {min}")]
    ReplicaBounds { min: u32, max: u32 },

    #[error("step must be at least 1")]
    ZeroStep,
}
