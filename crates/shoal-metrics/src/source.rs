//! The metrics source seam.

use std::time::Duration;

use async_trait::async_trait;

use shoal_core::MetricSample;

/// A point-in-time numeric query backend.
///
/// Implementations must not error: a source that is unreachable, a metric
/// that is absent, or a value that is non-numeric all come back as a sample
/// with `valid = false`, degrading only the services that depend on it.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query(&self, service: &str, metric: &str, timeout: Duration) -> MetricSample;
}
