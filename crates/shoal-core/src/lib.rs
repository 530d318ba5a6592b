pub mod config;
pub mod rules;
pub mod types;

pub use config::{ConfigError, ShoalConfig};
pub use rules::{RuleViolation, ScalingRule};
pub use types::*;
