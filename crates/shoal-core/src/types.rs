//! Shared types used across shoal crates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rules::ScalingRule;

/// A container port declared by a service in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// Port inside the container.
    pub container: u16,
    /// Host port the container port is published on, if any.
    pub published: Option<u16>,
    pub protocol: String,
}

impl ServicePort {
    pub fn tcp(container: u16, published: Option<u16>) -> Self {
        Self {
            container,
            published,
            protocol: "tcp".to_string(),
        }
    }
}

/// Per-service routing options, derived from `shoal.proxy.*` labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Whether the service appears in the routing document at all.
    pub enabled: bool,
    /// Verbatim router rule override. When absent the rule is derived
    /// from the service name and the configured domain suffix.
    pub rule: Option<String>,
    /// Backend port override for services declaring several ports.
    pub port: Option<u16>,
    /// Middleware names carried into the router entry.
    pub middlewares: Vec<String>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            rule: None,
            port: None,
            middlewares: Vec::new(),
        }
    }
}

/// A service parsed from the compose manifest.
///
/// Owned by service discovery; the control loop holds a read-only copy per
/// tick. Replica-count changes are only ever observed back from the
/// orchestrator, never written into the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub image: String,
    pub ports: Vec<ServicePort>,
    pub networks: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Replica count declared in the manifest (`deploy.replicas`, default 1).
    pub replicas: u32,
    pub proxy: ProxyOptions,
    /// Merged scaling rule (config defaults overlaid with labels), when the
    /// service opted into scaling.
    pub scaling: Option<ScalingRule>,
}

impl ServiceDescriptor {
    /// The port the proxy should target: the `shoal.proxy.port` label if
    /// present, else the first declared container port.
    pub fn main_port(&self) -> Option<u16> {
        self.proxy.port.or_else(|| self.ports.first().map(|p| p.container))
    }

    /// Default backend address on the shared container network, used until
    /// the orchestrator reports per-container endpoints.
    pub fn default_endpoint(&self) -> Option<String> {
        self.main_port().map(|port| format!("{}:{}", self.name, port))
    }
}

/// A point-in-time metric observation for one (service, metric) pair.
///
/// Samples for pairs that failed to resolve carry `valid = false` rather
/// than being errors; a single unreachable metrics source must not abort a
/// tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub service: String,
    pub metric: String,
    pub value: f64,
    /// Epoch seconds at which the sample was taken (or given up on).
    pub at: u64,
    pub valid: bool,
}

impl MetricSample {
    pub fn resolved(service: &str, metric: &str, value: f64, at: u64) -> Self {
        Self {
            service: service.to_string(),
            metric: metric.to_string(),
            value,
            at,
            valid: true,
        }
    }

    pub fn unresolved(service: &str, metric: &str, at: u64) -> Self {
        Self {
            service: service.to_string(),
            metric: metric.to_string(),
            value: 0.0,
            at,
            valid: false,
        }
    }
}

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    HighWatermark,
    LowWatermark,
    WithinBand,
    CooldownActive,
    MetricUnavailable,
    BoundsCorrection,
}

impl DecisionReason {
    pub fn label(&self) -> &'static str {
        match self {
            DecisionReason::HighWatermark => "high watermark",
            DecisionReason::LowWatermark => "low watermark",
            DecisionReason::WithinBand => "within band",
            DecisionReason::CooldownActive => "cooldown active",
            DecisionReason::MetricUnavailable => "metric unavailable",
            DecisionReason::BoundsCorrection => "bounds correction",
        }
    }

    /// Whether this decision came from a watermark crossing (as opposed to a
    /// correctness fix or a suppression).
    pub fn is_reactive(&self) -> bool {
        matches!(
            self,
            DecisionReason::HighWatermark | DecisionReason::LowWatermark
        )
    }
}

/// The outcome of evaluating one service in one tick.
///
/// `target_replicas` is always within the rule's bounds. A decision with
/// `target == current` is a valid no-op: reported for observability, never
/// reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub service: String,
    pub current_replicas: u32,
    pub target_replicas: u32,
    pub direction: ScaleDirection,
    pub reason: DecisionReason,
}

impl ScalingDecision {
    pub fn is_noop(&self) -> bool {
        self.target_replicas == self.current_replicas
    }
}

/// Live topology of a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTopology {
    pub replicas: u32,
    /// Live backend addresses, kept sorted.
    pub endpoints: Vec<String>,
}

impl ServiceTopology {
    pub fn new(replicas: u32, mut endpoints: Vec<String>) -> Self {
        endpoints.sort();
        Self { replicas, endpoints }
    }
}

/// Immutable point-in-time view of live service endpoints.
///
/// Rebuilt from scratch every tick; never mutated in place. A failed
/// projection leaves the previous on-disk document authoritative while the
/// loop carries the fresh snapshot forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    services: BTreeMap<String, ServiceTopology>,
}

impl TopologySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, topology: ServiceTopology) {
        self.services.insert(name.to_string(), topology);
    }

    pub fn get(&self, name: &str) -> Option<&ServiceTopology> {
        self.services.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServiceTopology)> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_port_prefers_label_override() {
        let mut svc = ServiceDescriptor {
            name: "api".to_string(),
            image: "api:latest".to_string(),
            ports: vec![ServicePort::tcp(8080, Some(80)), ServicePort::tcp(9090, None)],
            networks: vec![],
            labels: BTreeMap::new(),
            replicas: 1,
            proxy: ProxyOptions::default(),
            scaling: None,
        };
        assert_eq!(svc.main_port(), Some(8080));

        svc.proxy.port = Some(9090);
        assert_eq!(svc.main_port(), Some(9090));
        assert_eq!(svc.default_endpoint(), Some("api:9090".to_string()));
    }

    #[test]
    fn no_ports_means_no_endpoint() {
        let svc = ServiceDescriptor {
            name: "worker".to_string(),
            image: "worker:latest".to_string(),
            ports: vec![],
            networks: vec![],
            labels: BTreeMap::new(),
            replicas: 1,
            proxy: ProxyOptions::default(),
            scaling: None,
        };
        assert_eq!(svc.main_port(), None);
        assert_eq!(svc.default_endpoint(), None);
    }

    #[test]
    fn topology_endpoints_are_sorted() {
        let topo = ServiceTopology::new(
            2,
            vec!["10.0.0.9:80".to_string(), "10.0.0.1:80".to_string()],
        );
        assert_eq!(topo.endpoints, vec!["10.0.0.1:80", "10.0.0.9:80"]);
    }

    #[test]
    fn noop_decision_detection() {
        let decision = ScalingDecision {
            service: "web".to_string(),
            current_replicas: 2,
            target_replicas: 2,
            direction: ScaleDirection::None,
            reason: DecisionReason::WithinBand,
        };
        assert!(decision.is_noop());
    }

    #[test]
    fn reason_labels() {
        assert_eq!(DecisionReason::CooldownActive.label(), "cooldown active");
        assert_eq!(DecisionReason::MetricUnavailable.label(), "metric unavailable");
        assert_eq!(DecisionReason::BoundsCorrection.label(), "bounds correction");
        assert!(DecisionReason::HighWatermark.is_reactive());
        assert!(!DecisionReason::BoundsCorrection.is_reactive());
    }
}
