//! Applying accepted decisions, service by service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use shoal_core::config::ReconcileConfig;
use shoal_core::ScalingDecision;

use crate::error::OrchestratorError;
use crate::Orchestrator;

/// What happened to one service's reconciliation.
#[derive(Debug)]
pub enum ReconcileStatus {
    /// Replica change acknowledged; these are the addresses the
    /// orchestrator reported afterwards.
    Applied { endpoints: Vec<String> },
    /// Replica change acknowledged but the endpoint query failed; the
    /// snapshot keeps the service's previous endpoint list.
    EndpointsUnknown { reason: String },
    /// The replica change itself failed.
    Failed { error: OrchestratorError },
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    pub service: String,
    pub target: u32,
    pub status: ReconcileStatus,
}

impl ReconcileOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self.status, ReconcileStatus::Failed { .. })
    }
}

/// Applies a tick's non-no-op decisions against the orchestrator.
///
/// Requests for distinct services run in bounded parallel — they target
/// independent orchestrator resources. Transient communication failures are
/// retried with doubling backoff inside the tick; rejections are not.
pub struct Reconciler {
    orchestrator: Arc<dyn Orchestrator>,
    concurrency: usize,
    retries: u32,
    backoff: Duration,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, config: &ReconcileConfig) -> Self {
        Self {
            orchestrator,
            concurrency: config.concurrency.max(1),
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Apply each decision independently and return outcomes in the same
    /// order as the input. No-op decisions must be filtered out by the
    /// caller; they are never reconciled.
    pub async fn apply(&self, decisions: &[ScalingDecision]) -> Vec<ReconcileOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, decision) in decisions.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let semaphore = Arc::clone(&semaphore);
            let retries = self.retries;
            let backoff = self.backoff;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("reconciler semaphore closed");
                (
                    index,
                    apply_one(orchestrator.as_ref(), &decision, retries, backoff).await,
                )
            });
        }

        let mut outcomes: Vec<Option<ReconcileOutcome>> =
            (0..decisions.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!(error = %e, "reconcile task failed"),
            }
        }
        outcomes.into_iter().flatten().collect()
    }
}

async fn apply_one(
    orchestrator: &dyn Orchestrator,
    decision: &ScalingDecision,
    retries: u32,
    initial_backoff: Duration,
) -> ReconcileOutcome {
    let service = decision.service.as_str();
    let target = decision.target_replicas;

    let mut attempt = 0;
    let mut backoff = initial_backoff;
    loop {
        match orchestrator.set_replicas(service, target).await {
            Ok(()) => break,
            Err(e) if e.is_transient() && attempt < retries => {
                warn!(
                    service,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient reconcile failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => {
                error!(service, target, error = %e, "reconciliation failed");
                return ReconcileOutcome {
                    service: service.to_string(),
                    target,
                    status: ReconcileStatus::Failed { error: e },
                };
            }
        }
    }

    match orchestrator.live_endpoints(service).await {
        Ok(endpoints) => {
            info!(
                service,
                target,
                live = endpoints.len(),
                "reconciled service"
            );
            ReconcileOutcome {
                service: service.to_string(),
                target,
                status: ReconcileStatus::Applied { endpoints },
            }
        }
        Err(e) => {
            warn!(service, error = %e, "replica change applied but endpoint query failed");
            ReconcileOutcome {
                service: service.to_string(),
                target,
                status: ReconcileStatus::EndpointsUnknown {
                    reason: e.to_string(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shoal_core::{DecisionReason, ScaleDirection};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeOrchestrator {
        /// Services whose scale request is rejected outright.
        reject: HashSet<String>,
        /// Services that fail transiently this many times before succeeding.
        flaky: Mutex<HashMap<String, u32>>,
        calls: AtomicU32,
        applied: Mutex<Vec<(String, u32)>>,
    }

    impl FakeOrchestrator {
        fn rejecting(services: &[&str]) -> Self {
            Self {
                reject: services.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn flaky(service: &str, failures: u32) -> Self {
            let orchestrator = Self::default();
            orchestrator
                .flaky
                .lock()
                .unwrap()
                .insert(service.to_string(), failures);
            orchestrator
        }
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn set_replicas(&self, service: &str, target: u32) -> Result<(), OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject.contains(service) {
                return Err(OrchestratorError::Rejected {
                    service: service.to_string(),
                    target,
                    reason: "resource limit".to_string(),
                });
            }
            {
                let mut flaky = self.flaky.lock().unwrap();
                if let Some(remaining) = flaky.get_mut(service) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(OrchestratorError::Unavailable {
                            service: service.to_string(),
                            reason: "daemon hiccup".to_string(),
                        });
                    }
                }
            }
            self.applied
                .lock()
                .unwrap()
                .push((service.to_string(), target));
            Ok(())
        }

        async fn live_endpoints(&self, service: &str) -> Result<Vec<String>, OrchestratorError> {
            let applied = self.applied.lock().unwrap();
            let replicas = applied
                .iter()
                .rev()
                .find(|(s, _)| s == service)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            Ok((0..replicas)
                .map(|i| format!("10.0.0.{}:80", i + 1))
                .collect())
        }
    }

    fn decision(service: &str, current: u32, target: u32) -> ScalingDecision {
        ScalingDecision {
            service: service.to_string(),
            current_replicas: current,
            target_replicas: target,
            direction: if target > current {
                ScaleDirection::Up
            } else {
                ScaleDirection::Down
            },
            reason: DecisionReason::HighWatermark,
        }
    }

    fn reconciler(orchestrator: FakeOrchestrator) -> (Arc<FakeOrchestrator>, Reconciler) {
        let orchestrator = Arc::new(orchestrator);
        let reconciler = Reconciler::new(
            Arc::clone(&orchestrator) as Arc<dyn Orchestrator>,
            &ReconcileConfig {
                concurrency: 4,
                retries: 3,
                backoff_ms: 1,
            },
        );
        (orchestrator, reconciler)
    }

    #[tokio::test]
    async fn applies_decisions_and_reports_endpoints() {
        let (_, reconciler) = reconciler(FakeOrchestrator::default());
        let outcomes = reconciler.apply(&[decision("web", 2, 4)]).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].applied());
        match &outcomes[0].status {
            ReconcileStatus::Applied { endpoints } => assert_eq!(endpoints.len(), 4),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let (orchestrator, reconciler) = reconciler(FakeOrchestrator::rejecting(&["web"]));
        let outcomes = reconciler.apply(&[decision("web", 2, 4)]).await;

        assert!(matches!(
            outcomes[0].status,
            ReconcileStatus::Failed { .. }
        ));
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let (orchestrator, reconciler) = reconciler(FakeOrchestrator::flaky("web", 2));
        let outcomes = reconciler.apply(&[decision("web", 2, 4)]).await;

        assert!(outcomes[0].applied());
        // Two failures plus the success.
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retries() {
        let (orchestrator, reconciler) = reconciler(FakeOrchestrator::flaky("web", 10));
        let outcomes = reconciler.apply(&[decision("web", 2, 4)]).await;

        assert!(matches!(
            outcomes[0].status,
            ReconcileStatus::Failed { .. }
        ));
        // Initial attempt + 3 retries.
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_other_services() {
        let (orchestrator, reconciler) = reconciler(FakeOrchestrator::rejecting(&["web"]));
        let outcomes = reconciler
            .apply(&[decision("web", 2, 4), decision("api", 1, 2)])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].applied());
        assert!(outcomes[1].applied());
        assert_eq!(
            orchestrator.applied.lock().unwrap().as_slice(),
            &[("api".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn outcomes_preserve_decision_order() {
        let (_, reconciler) = reconciler(FakeOrchestrator::default());
        let outcomes = reconciler
            .apply(&[
                decision("a", 1, 2),
                decision("b", 1, 2),
                decision("c", 1, 2),
            ])
            .await;
        let services: Vec<&str> = outcomes.iter().map(|o| o.service.as_str()).collect();
        assert_eq!(services, vec!["a", "b", "c"]);
    }
}
