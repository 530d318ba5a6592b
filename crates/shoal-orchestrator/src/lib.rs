//! shoal-orchestrator — applying scaling decisions to the container runtime.
//!
//! The [`Orchestrator`] trait is the seam to the container runtime:
//! `set_replicas` requests a replica-count change and waits for
//! acknowledgement (not convergence — the runtime drives container
//! start/stop asynchronously), `live_endpoints` reports the addresses that
//! are actually serving, which may legitimately differ from a naive
//! `current + step` while containers are still starting.
//!
//! [`Reconciler`] applies a tick's accepted decisions independently and in
//! bounded parallel: one service's failure is recorded and surfaced without
//! blocking or rolling back the others.

pub mod compose;
pub mod error;
pub mod reconciler;

use async_trait::async_trait;

pub use compose::ComposeOrchestrator;
pub use error::OrchestratorError;
pub use reconciler::{ReconcileOutcome, ReconcileStatus, Reconciler};

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Request a replica-count change and wait for acknowledgement.
    async fn set_replicas(&self, service: &str, target: u32) -> Result<(), OrchestratorError>;

    /// Addresses of the service's currently live containers.
    async fn live_endpoints(&self, service: &str) -> Result<Vec<String>, OrchestratorError>;
}
