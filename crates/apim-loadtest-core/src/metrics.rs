//! Request metrics: per-response records, per-request observers, and export
//!
//! Metrics are registered lazily in the default Prometheus registry on first
//! access using once_cell::Lazy.

use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use url::Url;

use crate::error::{LoadTestError, LoadTestResult};
use crate::priority::Priority;
use crate::request::RequestKind;

/// Results of gateway requests by status, priority, request type and reason
pub static REQUEST_RESULT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "apim_loadtest_request_result_total",
        "Gateway responses by status, priority, request type and reason",
        &["status_code", "priority", "request_type", "reason"]
    )
    .expect("Failed to register request result counter")
});

/// Request latency as seen by simulated users
pub static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "apim_loadtest_request_duration_seconds",
        "Gateway request duration in seconds",
        &["request_type", "result"],
        // Buckets: 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register request duration histogram")
});

/// Number of simulated users currently running
pub static ACTIVE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "apim_loadtest_active_users",
        "Number of simulated users currently running"
    )
    .expect("Failed to register active users gauge")
});

/// Observation emitted once per completed gateway response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub status_code: u16,
    pub priority: Priority,
    pub request_kind: RequestKind,
    pub reason: String,
}

/// Write-only destination for [`MetricRecord`]s.
pub trait MetricSink: Send + Sync {
    fn record(&self, record: &MetricRecord);
}

/// Sink backed by the [`REQUEST_RESULT`] counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricSink for PrometheusSink {
    fn record(&self, record: &MetricRecord) {
        REQUEST_RESULT
            .with_label_values(&[
                &record.status_code.to_string(),
                record.priority.label(),
                record.request_kind.as_str(),
                &record.reason,
            ])
            .inc();
    }
}

/// Sink keeping every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<MetricRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().clone()
    }
}

impl MetricSink for MemorySink {
    fn record(&self, record: &MetricRecord) {
        self.records.lock().push(record.clone());
    }
}

/// One finished simulated-user request, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    pub request_kind: RequestKind,
    pub priority: Priority,
    /// Status code, or `None` when the request failed before a response.
    pub status_code: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>,
}

impl RequestEvent {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status_code, Some(code) if (200..300).contains(&code))
    }
}

/// Listener invoked synchronously for every completed request.
pub trait RequestObserver: Send + Sync {
    fn on_request(&self, event: &RequestEvent);
}

/// Observer feeding [`REQUEST_DURATION`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestMetricObserver;

impl RequestObserver for RequestMetricObserver {
    fn on_request(&self, event: &RequestEvent) {
        let result = if event.is_success() { "success" } else { "failure" };
        REQUEST_DURATION
            .with_label_values(&[event.request_kind.as_str(), result])
            .observe(event.latency.as_secs_f64());
    }
}

/// Pushes the default registry to a Prometheus push gateway.
pub struct MetricsExporter {
    client: reqwest::Client,
    url: Url,
}

impl MetricsExporter {
    /// Job name used in the push URL.
    pub const JOB: &'static str = "apim-loadtest";

    pub fn new(client: reqwest::Client, endpoint: &str) -> LoadTestResult<Self> {
        let mut base = endpoint.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base)?.join(&format!("metrics/job/{}", Self::JOB))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Encodes everything gathered so far and replaces the job's metrics on
    /// the gateway.
    pub async fn push(&self) -> LoadTestResult<()> {
        // Touch the statics so they are registered even if nothing fired yet
        Lazy::force(&REQUEST_RESULT);
        Lazy::force(&REQUEST_DURATION);
        Lazy::force(&ACTIVE_USERS);

        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        debug!("Pushing {} metric families ({} bytes)", families.len(), buffer.len());

        let response = self
            .client
            .put(self.url.clone())
            .header(CONTENT_TYPE, encoder.format_type())
            .body(buffer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoadTestError::UnexpectedStatus {
                service: "metrics push gateway",
                status: status.as_u16(),
                body,
            });
        }

        info!("Pushed request metrics to {}", self.url);
        Ok(())
    }
}
