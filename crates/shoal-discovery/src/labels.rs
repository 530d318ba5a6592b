//! `shoal.*` label extraction.

use std::collections::BTreeMap;

use tracing::warn;

use shoal_core::{ProxyOptions, ScalingRule, ShoalConfig};

const SCALE_ENABLED: &str = "shoal.scale.enabled";
const PROXY_ENABLE: &str = "shoal.proxy.enable";
const PROXY_RULE: &str = "shoal.proxy.rule";
const PROXY_PORT: &str = "shoal.proxy.port";
const PROXY_MIDDLEWARES: &str = "shoal.proxy.middlewares";

pub(crate) fn proxy_options(
    service: &str,
    labels: &BTreeMap<String, String>,
) -> ProxyOptions {
    let mut options = ProxyOptions::default();
    if labels.get(PROXY_ENABLE).map(String::as_str) == Some("false") {
        options.enabled = false;
    }
    options.rule = labels.get(PROXY_RULE).cloned();
    options.port = parse_label(service, labels, PROXY_PORT);
    if let Some(raw) = labels.get(PROXY_MIDDLEWARES) {
        options.middlewares = raw
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
    }
    options
}

/// Resolve the scaling rule for a service: config defaults (global, then
/// per-service) overlaid with `shoal.scale.*` labels. Returns `None` when
/// the service never opted into scaling or the merged rule is invalid.
pub(crate) fn scaling_rule(
    service: &str,
    labels: &BTreeMap<String, String>,
    config: &ShoalConfig,
) -> Option<ScalingRule> {
    let enabled_by_label = labels.get(SCALE_ENABLED).map(String::as_str) == Some("true");
    if !enabled_by_label && !config.has_service_rule(service) {
        return None;
    }

    let mut rule = config.rule_for(service);
    if let Some(metric) = labels.get("shoal.scale.metric") {
        rule.metric = metric.clone();
    }
    if let Some(value) = parse_label(service, labels, "shoal.scale.high") {
        rule.high_watermark = value;
    }
    if let Some(value) = parse_label(service, labels, "shoal.scale.low") {
        rule.low_watermark = value;
    }
    if let Some(value) = parse_label(service, labels, "shoal.scale.min") {
        rule.min_replicas = value;
    }
    if let Some(value) = parse_label(service, labels, "shoal.scale.max") {
        rule.max_replicas = value;
    }
    if let Some(value) = parse_label(service, labels, "shoal.scale.step") {
        rule.step = value;
    }
    if let Some(value) = parse_label(service, labels, "shoal.scale.cooldown") {
        rule.cooldown_secs = value;
    }

    match rule.validate() {
        Ok(()) => Some(rule),
        Err(violation) => {
            warn!(service, %violation, "merged scaling rule is invalid, service will not scale");
            None
        }
    }
}

fn parse_label<T: std::str::FromStr>(
    service: &str,
    labels: &BTreeMap<String, String>,
    key: &str,
) -> Option<T> {
    let raw = labels.get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(service, key, value = %raw, "ignoring invalid label value");
            None
        }
    }
}
