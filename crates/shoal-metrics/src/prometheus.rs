//! Prometheus HTTP API client.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use shoal_core::config::PrometheusConfig;
use shoal_core::MetricSample;

use crate::source::MetricsSource;

/// Queries the Prometheus `/api/v1/query` endpoint using per-metric PromQL
/// templates with a `{service}` placeholder.
pub struct PrometheusSource {
    client: reqwest::Client,
    base_url: String,
    templates: BTreeMap<String, String>,
}

impl PrometheusSource {
    pub fn new(config: &PrometheusConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            templates: config.queries.clone(),
        })
    }

    fn expr_for(&self, service: &str, metric: &str) -> Option<String> {
        self.templates
            .get(metric)
            .map(|template| template.replace("{service}", service))
    }

    async fn fetch_value(&self, expr: &str) -> Option<f64> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "prometheus query failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "prometheus returned non-success");
            return None;
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to read prometheus response body");
                return None;
            }
        };
        parse_query_response(&body)
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(&self, service: &str, metric: &str, timeout: Duration) -> MetricSample {
        let at = epoch_secs();
        let Some(expr) = self.expr_for(service, metric) else {
            warn!(service, metric, "no query template configured for metric");
            return MetricSample::unresolved(service, metric, at);
        };

        match tokio::time::timeout(timeout, self.fetch_value(&expr)).await {
            Ok(Some(value)) => {
                debug!(service, metric, value, "sampled metric");
                MetricSample::resolved(service, metric, value, at)
            }
            Ok(None) => MetricSample::unresolved(service, metric, at),
            Err(_) => {
                warn!(service, metric, "prometheus query timed out");
                MetricSample::unresolved(service, metric, at)
            }
        }
    }
}

/// Extract the first result's scalar value from a query response body.
/// Any shape mismatch yields `None` — an invalid sample, never an error.
fn parse_query_response(body: &[u8]) -> Option<f64> {
    #[derive(Deserialize)]
    struct QueryResponse {
        status: String,
        #[serde(default)]
        data: Option<QueryData>,
    }
    #[derive(Deserialize)]
    struct QueryData {
        #[serde(default)]
        result: Vec<QueryResult>,
    }
    #[derive(Deserialize)]
    struct QueryResult {
        // Prometheus instant vectors carry [unix_ts, "value"].
        value: (f64, String),
    }

    let response: QueryResponse = serde_json::from_slice(body).ok()?;
    if response.status != "success" {
        return None;
    }
    let data = response.data?;
    let first = data.result.first()?;
    first.value.1.parse().ok()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
