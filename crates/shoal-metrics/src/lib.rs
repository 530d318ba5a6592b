//! shoal-metrics — metric sampling for the control loop.
//!
//! A [`MetricsSource`] answers point-in-time numeric queries for a
//! (service, metric) pair and never raises for "value not found" — it
//! returns an invalid sample instead. [`PrometheusSource`] implements the
//! trait against the Prometheus HTTP query API.
//!
//! [`MetricSampler`] fans a tick's pairs out over a bounded worker pool
//! under a wall-clock budget: whatever resolves in time is returned, the
//! rest is marked invalid. There are no retries within a tick — the next
//! tick's sampling attempt is the retry.

pub mod prometheus;
pub mod sampler;
pub mod source;

pub use prometheus::PrometheusSource;
pub use sampler::MetricSampler;
pub use source::MetricsSource;
