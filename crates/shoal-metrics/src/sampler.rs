//! Per-tick metric sampling with a wall-clock budget.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use shoal_core::config::SamplingConfig;
use shoal_core::MetricSample;

use crate::source::MetricsSource;

/// A (service, metric) pair to sample this tick.
pub type MetricKey = (String, String);

/// Fans metric queries out over a bounded worker pool and returns whatever
/// resolved within the tick's budget, marking the rest invalid.
///
/// The budget is the loop's only cancellation mechanism: a slow metrics
/// backend cannot stall a tick indefinitely.
pub struct MetricSampler {
    source: Arc<dyn MetricsSource>,
    concurrency: usize,
    budget: Duration,
}

impl MetricSampler {
    pub fn new(source: Arc<dyn MetricsSource>, config: &SamplingConfig) -> Self {
        Self {
            source,
            concurrency: config.concurrency.max(1),
            budget: Duration::from_millis(config.budget_ms),
        }
    }

    pub async fn sample(&self, pairs: &[MetricKey]) -> BTreeMap<MetricKey, MetricSample> {
        let deadline = tokio::time::Instant::now() + self.budget;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (service, metric) in pairs {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let service = service.clone();
            let metric = metric.clone();
            let timeout = self.budget;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("sampler semaphore closed");
                let sample = source.query(&service, &metric, timeout).await;
                ((service, metric), sample)
            });
        }

        let mut samples = BTreeMap::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((key, sample)))) => {
                    samples.insert(key, sample);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "metric query task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        unresolved = pairs.len() - samples.len(),
                        "sampling budget exhausted, marking remaining pairs invalid"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        let at = epoch_secs();
        for (service, metric) in pairs {
            samples
                .entry((service.clone(), metric.clone()))
                .or_insert_with(|| MetricSample::unresolved(service, metric, at));
        }

        debug!(
            total = samples.len(),
            valid = samples.values().filter(|s| s.valid).count(),
            "sampling pass complete"
        );
        samples
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
