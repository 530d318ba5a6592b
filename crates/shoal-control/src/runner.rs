//! The control loop itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use shoal_autoscale::CooldownTracker;
use shoal_core::{
    MetricSample, ScalingDecision, ServiceDescriptor, ServiceTopology, TopologySnapshot,
};
use shoal_discovery::{DiscoveryError, ServiceDiscovery};
use shoal_metrics::MetricSampler;
use shoal_orchestrator::{ReconcileOutcome, ReconcileStatus, Reconciler};
use shoal_proxy::ConfigProjector;

use crate::trigger::TickTrigger;

/// A fatal tick abort. The previous routing document and replica counts
/// remain authoritative; the next tick retries from scratch.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("service discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// What one tick did, for logging and operators.
#[derive(Debug)]
pub struct TickReport {
    pub trigger: TickTrigger,
    /// Every decision, no-ops included — they are reported for
    /// observability but never reconciled.
    pub decisions: Vec<ScalingDecision>,
    pub outcomes: Vec<ReconcileOutcome>,
    pub projected: bool,
    pub projection_error: Option<String>,
}

/// Orchestrates ticks. Strictly sequential: one tick runs to completion
/// before the next trigger is consumed.
pub struct ControlLoop {
    manifest: PathBuf,
    discovery: Arc<dyn ServiceDiscovery>,
    sampler: MetricSampler,
    reconciler: Reconciler,
    projector: ConfigProjector,
    cooldowns: CooldownTracker,
    snapshot: TopologySnapshot,
    /// Most recent valid sample per (service, metric), kept for
    /// diagnostics only — never used to decide a tick whose own sample
    /// is invalid.
    last_samples: BTreeMap<(String, String), MetricSample>,
    dry_run: bool,
}

impl ControlLoop {
    pub fn new(
        manifest: PathBuf,
        discovery: Arc<dyn ServiceDiscovery>,
        sampler: MetricSampler,
        reconciler: Reconciler,
        projector: ConfigProjector,
    ) -> Self {
        Self {
            manifest,
            discovery,
            sampler,
            reconciler,
            projector,
            cooldowns: CooldownTracker::new(),
            snapshot: TopologySnapshot::new(),
            last_samples: BTreeMap::new(),
            dry_run: false,
        }
    }

    /// Dry-run mode executes sampling and deciding only, logging what would
    /// be reconciled and projected.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    pub fn last_sample(&self, service: &str, metric: &str) -> Option<&MetricSample> {
        self.last_samples
            .get(&(service.to_string(), metric.to_string()))
    }

    /// Run one tick with the real clock.
    pub async fn tick(&mut self, trigger: TickTrigger) -> Result<TickReport, TickError> {
        let now = epoch_secs();
        self.tick_at(trigger, now).await
    }

    /// Run one tick at an injected instant. This is the whole tick state
    /// machine; `tick()` only adds the clock.
    pub async fn tick_at(
        &mut self,
        trigger: TickTrigger,
        now: u64,
    ) -> Result<TickReport, TickError> {
        debug!(trigger = trigger.label(), "tick starting");

        let services = match self.discovery.list_services(&self.manifest) {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "tick aborted: discovery failed");
                return Err(TickError::Discovery(e));
            }
        };
        self.cooldowns
            .retain(|name| services.iter().any(|s| s.name == name));

        // ── Sampling ──────────────────────────────────────────────
        let pairs: Vec<(String, String)> = services
            .iter()
            .filter_map(|s| {
                s.scaling
                    .as_ref()
                    .map(|rule| (s.name.clone(), rule.metric.clone()))
            })
            .collect();
        let samples = self.sampler.sample(&pairs).await;
        for (key, sample) in &samples {
            if sample.valid {
                self.last_samples.insert(key.clone(), sample.clone());
            }
        }

        // ── Deciding ──────────────────────────────────────────────
        // Runs to completion before any reconciliation is issued.
        let mut decisions = Vec::new();
        for service in &services {
            let Some(rule) = &service.scaling else {
                continue;
            };
            let current = self
                .snapshot
                .get(&service.name)
                .map(|t| t.replicas)
                .unwrap_or(service.replicas);
            let key = (service.name.clone(), rule.metric.clone());
            let decision = shoal_autoscale::evaluate(
                &service.name,
                current,
                rule,
                samples.get(&key),
                &self.cooldowns,
                now,
            );
            info!(
                service = %decision.service,
                current = decision.current_replicas,
                target = decision.target_replicas,
                reason = decision.reason.label(),
                "scaling decision"
            );
            if !decision.is_noop() && decision.reason.is_reactive() {
                self.cooldowns
                    .record(&decision.service, decision.direction, now);
            }
            decisions.push(decision);
        }

        let actionable: Vec<ScalingDecision> =
            decisions.iter().filter(|d| !d.is_noop()).cloned().collect();

        if self.dry_run {
            for decision in &actionable {
                info!(
                    service = %decision.service,
                    target = decision.target_replicas,
                    "dry-run: would scale"
                );
            }
            info!(
                decisions = actionable.len(),
                "dry-run: skipping reconciliation and projection"
            );
            return Ok(TickReport {
                trigger,
                decisions,
                outcomes: Vec::new(),
                projected: false,
                projection_error: None,
            });
        }

        // ── Reconciling ───────────────────────────────────────────
        let outcomes = self.reconciler.apply(&actionable).await;

        // ── Projecting ────────────────────────────────────────────
        let next = build_snapshot(&services, &self.snapshot, &outcomes);
        let document = self.projector.project(&services, &next);
        let (projected, projection_error) = match self.projector.write(&document) {
            Ok(()) => (true, None),
            Err(e) => {
                // Replica changes already applied stand; reverting issued
                // orchestrator commands is not well-defined.
                error!(error = %e, "projection failed, previous document stays authoritative");
                (false, Some(e.to_string()))
            }
        };

        self.snapshot = next;
        Ok(TickReport {
            trigger,
            decisions,
            outcomes,
            projected,
            projection_error,
        })
    }

    /// Drive ticks from the interval timer and the trigger channel until
    /// shutdown. A trigger arriving mid-tick waits in the capacity-1
    /// channel; ticks never interleave.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut triggers: mpsc::Receiver<TickTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            dry_run = self.dry_run,
            "control loop started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_tick(TickTrigger::Interval).await;
                }
                received = triggers.recv() => match received {
                    Some(trigger) => self.run_tick(trigger).await,
                    None => {
                        debug!("trigger channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
        }
    }

    async fn run_tick(&mut self, trigger: TickTrigger) {
        match self.tick(trigger).await {
            Ok(report) => {
                let failed = report.outcomes.iter().filter(|o| !o.applied()).count();
                info!(
                    trigger = report.trigger.label(),
                    decisions = report.decisions.len(),
                    reconciled = report.outcomes.len() - failed,
                    failed,
                    projected = report.projected,
                    "tick complete"
                );
            }
            Err(e) => error!(error = %e, "tick aborted"),
        }
    }
}

/// Rebuild the topology snapshot from this tick's descriptors and
/// reconciliation outcomes. Never mutates the previous snapshot; a
/// service whose reconciliation failed keeps its prior replica count and
/// endpoint list.
fn build_snapshot(
    services: &[ServiceDescriptor],
    previous: &TopologySnapshot,
    outcomes: &[ReconcileOutcome],
) -> TopologySnapshot {
    let mut next = TopologySnapshot::new();
    for service in services {
        let prior = previous.get(&service.name);
        let outcome = outcomes.iter().find(|o| o.service == service.name);
        let (replicas, endpoints) = match outcome {
            Some(outcome) => match &outcome.status {
                ReconcileStatus::Applied { endpoints } => {
                    (outcome.target, endpoints.clone())
                }
                ReconcileStatus::EndpointsUnknown { .. } => {
                    (outcome.target, carry_endpoints(service, prior))
                }
                ReconcileStatus::Failed { .. } => (
                    prior.map(|t| t.replicas).unwrap_or(service.replicas),
                    carry_endpoints(service, prior),
                ),
            },
            None => (
                prior.map(|t| t.replicas).unwrap_or(service.replicas),
                carry_endpoints(service, prior),
            ),
        };
        next.insert(&service.name, ServiceTopology::new(replicas, endpoints));
    }
    next
}

fn carry_endpoints(
    service: &ServiceDescriptor,
    prior: Option<&ServiceTopology>,
) -> Vec<String> {
    match prior {
        Some(topology) => topology.endpoints.clone(),
        // First sighting: the service's name on the shared network is the
        // baseline backend address until the orchestrator reports more.
        None => service.default_endpoint().into_iter().collect(),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::{ProxyOptions, ServicePort};
    use shoal_orchestrator::OrchestratorError;
    use std::collections::BTreeMap;

    fn make_service(name: &str, replicas: u32) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            image: format!("{name}:latest"),
            ports: vec![ServicePort::tcp(80, None)],
            networks: vec![],
            labels: BTreeMap::new(),
            replicas,
            proxy: ProxyOptions::default(),
            scaling: None,
        }
    }

    fn outcome(service: &str, target: u32, status: ReconcileStatus) -> ReconcileOutcome {
        ReconcileOutcome {
            service: service.to_string(),
            target,
            status,
        }
    }

    #[test]
    fn first_sighting_uses_declared_replicas_and_default_endpoint() {
        let services = vec![make_service("web", 2)];
        let next = build_snapshot(&services, &TopologySnapshot::new(), &[]);

        let web = next.get("web").unwrap();
        assert_eq!(web.replicas, 2);
        assert_eq!(web.endpoints, vec!["web:80"]);
    }

    #[test]
    fn applied_outcome_replaces_replicas_and_endpoints() {
        let services = vec![make_service("web", 2)];
        let mut previous = TopologySnapshot::new();
        previous.insert("web", ServiceTopology::new(2, vec!["web:80".to_string()]));

        let outcomes = vec![outcome(
            "web",
            4,
            ReconcileStatus::Applied {
                endpoints: vec![
                    "10.0.0.2:80".to_string(),
                    "10.0.0.3:80".to_string(),
                    "10.0.0.4:80".to_string(),
                    "10.0.0.5:80".to_string(),
                ],
            },
        )];
        let next = build_snapshot(&services, &previous, &outcomes);

        let web = next.get("web").unwrap();
        assert_eq!(web.replicas, 4);
        assert_eq!(web.endpoints.len(), 4);
    }

    #[test]
    fn failed_outcome_keeps_prior_entry() {
        let services = vec![make_service("web", 2)];
        let mut previous = TopologySnapshot::new();
        previous.insert(
            "web",
            ServiceTopology::new(3, vec!["10.0.0.2:80".to_string()]),
        );

        let outcomes = vec![outcome(
            "web",
            5,
            ReconcileStatus::Failed {
                error: OrchestratorError::Rejected {
                    service: "web".to_string(),
                    target: 5,
                    reason: "limit".to_string(),
                },
            },
        )];
        let next = build_snapshot(&services, &previous, &outcomes);

        let web = next.get("web").unwrap();
        assert_eq!(web.replicas, 3);
        assert_eq!(web.endpoints, vec!["10.0.0.2:80"]);
    }

    #[test]
    fn endpoints_unknown_advances_replicas_but_keeps_endpoints() {
        let services = vec![make_service("web", 2)];
        let mut previous = TopologySnapshot::new();
        previous.insert(
            "web",
            ServiceTopology::new(2, vec!["10.0.0.2:80".to_string()]),
        );

        let outcomes = vec![outcome(
            "web",
            3,
            ReconcileStatus::EndpointsUnknown {
                reason: "inspect failed".to_string(),
            },
        )];
        let next = build_snapshot(&services, &previous, &outcomes);

        let web = next.get("web").unwrap();
        assert_eq!(web.replicas, 3);
        assert_eq!(web.endpoints, vec!["10.0.0.2:80"]);
    }

    #[test]
    fn services_removed_from_manifest_drop_out() {
        let mut previous = TopologySnapshot::new();
        previous.insert("gone", ServiceTopology::new(2, vec![]));

        let services = vec![make_service("web", 1)];
        let next = build_snapshot(&services, &previous, &[]);

        assert!(next.get("gone").is_none());
        assert!(next.get("web").is_some());
    }

    #[test]
    fn observed_count_wins_over_declared() {
        let services = vec![make_service("web", 2)];
        let mut previous = TopologySnapshot::new();
        previous.insert(
            "web",
            ServiceTopology::new(5, vec!["10.0.0.2:80".to_string()]),
        );

        let next = build_snapshot(&services, &previous, &[]);
        assert_eq!(next.get("web").unwrap().replicas, 5);
    }
}
