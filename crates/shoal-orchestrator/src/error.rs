//! Orchestrator error types.

use thiserror::Error;

/// Errors from the orchestrator seam.
///
/// `Unavailable` covers communication failures and is worth retrying within
/// the tick; `Rejected` is a definitive answer (e.g. resource limits,
/// unknown service) and is surfaced as a hard failure for that service only.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator rejected scaling {service} to {target}: {reason}")]
    Rejected {
        service: String,
        target: u32,
        reason: String,
    },

    #[error("orchestrator unreachable for {service}: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("failed to inspect endpoints for {service}: {reason}")]
    Inspect { service: String, reason: String },
}

impl OrchestratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::Unavailable { .. })
    }
}
