//! shoal.toml configuration parser.
//!
//! Malformed scaling rules are rejected here, at load time; they are the
//! only process-fatal failure class. Everything downstream degrades
//! per-service instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::{RuleViolation, ScalingRule};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShoalConfig {
    /// Compose-style manifest the loop discovers services from.
    pub compose_file: PathBuf,
    /// Destination for the generated routing document.
    pub routing_file: PathBuf,
    /// Joined to service names with a dot for derived Host rules.
    pub domain_suffix: String,
    pub tick_interval_secs: u64,
    pub watch_debounce_ms: u64,
    pub sampling: SamplingConfig,
    pub reconcile: ReconcileConfig,
    pub prometheus: PrometheusConfig,
    /// Defaults applied to every service that opts into scaling.
    pub default_rule: RuleOverlay,
    /// Per-service rule overrides, keyed by service name.
    pub services: BTreeMap<String, RuleOverlay>,
}

impl Default for ShoalConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("docker-compose.yml"),
            routing_file: PathBuf::from("config/dynamic/services.yml"),
            domain_suffix: "localhost".to_string(),
            tick_interval_secs: 60,
            watch_debounce_ms: 500,
            sampling: SamplingConfig::default(),
            reconcile: ReconcileConfig::default(),
            prometheus: PrometheusConfig::default(),
            default_rule: RuleOverlay::default(),
            services: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Wall-clock budget for one tick's metric queries. Pairs unresolved
    /// at the deadline are marked invalid; the next tick is the retry.
    pub budget_ms: u64,
    pub concurrency: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            budget_ms: 10_000,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub concurrency: usize,
    /// Retries for transient orchestrator failures within one tick.
    pub retries: u32,
    /// Initial backoff, doubled per retry.
    pub backoff_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retries: 3,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Metric name → PromQL template; `{service}` is substituted per query.
    pub queries: BTreeMap<String, String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        let mut queries = BTreeMap::new();
        queries.insert(
            "cpu".to_string(),
            r#"rate(container_cpu_usage_seconds_total{name=~".*{service}.*"}[5m]) * 100"#
                .to_string(),
        );
        queries.insert(
            "memory".to_string(),
            r#"(container_memory_usage_bytes{name=~".*{service}.*"} / container_spec_memory_limit_bytes{name=~".*{service}.*"}) * 100"#
                .to_string(),
        );
        Self {
            url: "http://localhost:9090".to_string(),
            timeout_ms: 5_000,
            queries,
        }
    }
}

/// Partial rule used for config-file defaults and per-service overrides.
/// Unset fields fall through to the base rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverlay {
    pub metric: Option<String>,
    pub high_watermark: Option<f64>,
    pub low_watermark: Option<f64>,
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
    pub step: Option<u32>,
    pub cooldown_secs: Option<u64>,
}

impl RuleOverlay {
    pub fn apply(&self, base: &ScalingRule) -> ScalingRule {
        ScalingRule {
            metric: self.metric.clone().unwrap_or_else(|| base.metric.clone()),
            high_watermark: self.high_watermark.unwrap_or(base.high_watermark),
            low_watermark: self.low_watermark.unwrap_or(base.low_watermark),
            min_replicas: self.min_replicas.unwrap_or(base.min_replicas),
            max_replicas: self.max_replicas.unwrap_or(base.max_replicas),
            step: self.step.unwrap_or(base.step),
            cooldown_secs: self.cooldown_secs.unwrap_or(base.cooldown_secs),
        }
    }
}

impl ShoalConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ShoalConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every resolvable rule against the data-model invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_rule()
            .validate()
            .map_err(|violation| ConfigError::InvalidRule {
                scope: "default_rule".to_string(),
                violation,
            })?;
        for (service, overlay) in &self.services {
            overlay
                .apply(&self.base_rule())
                .validate()
                .map_err(|violation| ConfigError::InvalidRule {
                    scope: service.clone(),
                    violation,
                })?;
        }
        Ok(())
    }

    /// The built-in rule with the config-file defaults applied.
    pub fn base_rule(&self) -> ScalingRule {
        self.default_rule.apply(&ScalingRule::default())
    }

    /// The resolved rule for a service, before label overrides.
    pub fn rule_for(&self, service: &str) -> ScalingRule {
        let base = self.base_rule();
        match self.services.get(service) {
            Some(overlay) => overlay.apply(&base),
            None => base,
        }
    }

    /// Whether the config names this service explicitly (which opts it into
    /// scaling even without a `shoal.scale.enabled` label).
    pub fn has_service_rule(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid scaling rule for {scope}: {violation}")]
    InvalidRule {
        scope: String,
        violation: RuleViolation,
    },
}
