//! Priority scenario: simulator setup at start, analytics report at stop.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::analytics::{credential_from_settings, LogAnalyticsClient, LogStore, WaitOutcome, WaitPolicy};
use crate::config::LoadTestConfig;
use crate::error::{LoadTestError, LoadTestResult};
use crate::lifecycle::{ObserverRegistry, RunContext, ScenarioHooks};
use crate::metrics::{MetricsExporter, RequestMetricObserver};
use crate::report::prioritization::{ingestion_check_query, report_queries, time_range_filter};
use crate::report::{PortalLink, QueryProcessor, ReportSink, StdoutSink};
use crate::simulator::{SimulatorClient, BASELINE_CHAT_COMPLETIONS_LATENCY};

/// Hooks for the APIM prioritization load test.
pub struct PrioritizationScenario {
    config: LoadTestConfig,
    client: reqwest::Client,
    simulator: SimulatorClient,
    exporter: Option<MetricsExporter>,
    store: Option<Arc<dyn LogStore>>,
    sink: Arc<dyn ReportSink>,
}

impl PrioritizationScenario {
    pub fn new(config: LoadTestConfig, client: reqwest::Client) -> LoadTestResult<Self> {
        let simulator = SimulatorClient::new(client.clone(), config.simulator.api_key.clone());
        let exporter = config
            .metrics_export_endpoint
            .as_deref()
            .map(|endpoint| MetricsExporter::new(client.clone(), endpoint))
            .transpose()?;

        Ok(Self {
            config,
            client,
            simulator,
            exporter,
            store: None,
            sink: Arc::new(StdoutSink),
        })
    }

    /// Uses `store` for the report instead of the configured workspace.
    pub fn with_log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    fn log_store(&self) -> LoadTestResult<Arc<dyn LogStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }

        let workspace_id = self
            .config
            .workspace
            .workspace_id
            .as_deref()
            .ok_or_else(|| LoadTestError::config("LOG_ANALYTICS_WORKSPACE_ID is not set"))?;
        let credential = credential_from_settings(
            self.client.clone(),
            &self.config.analytics,
            self.config.workspace.tenant_id.as_deref(),
        )?;

        Ok(Arc::new(LogAnalyticsClient::new(
            self.client.clone(),
            &self.config.analytics.endpoint,
            workspace_id,
            credential,
        )?))
    }
}

#[async_trait]
impl ScenarioHooks for PrioritizationScenario {
    async fn on_init(&self, observers: &mut ObserverRegistry) -> LoadTestResult<()> {
        match &self.exporter {
            Some(exporter) => {
                observers.add(Arc::new(RequestMetricObserver));
                info!("Request metrics will be pushed to {}", exporter.url());
            }
            None => warn!("METRICS_EXPORT_ENDPOINT not set, request metrics disabled"),
        }
        Ok(())
    }

    async fn on_test_start(&self, _ctx: &RunContext) -> LoadTestResult<()> {
        let endpoint = self
            .config
            .simulator
            .endpoint_payg1
            .as_deref()
            .ok_or_else(|| LoadTestError::config("SIMULATOR_ENDPOINT_PAYG1 is not set"))?;

        self.simulator
            .set_chat_completions_latency(endpoint, BASELINE_CHAT_COMPLETIONS_LATENCY)
            .await
    }

    async fn on_test_stop(&self, ctx: &RunContext) -> LoadTestResult<()> {
        let window = ctx
            .time_window()
            .ok_or_else(|| LoadTestError::invalid_state("run has no start/stop time"))?;
        info!("Test run window: {}", time_range_filter(&window));

        let store = self.log_store()?;
        let policy = WaitPolicy::with_timeout(self.config.analytics.wait_timeout);
        info!("Waiting for gateway logs to be ingested");
        if let WaitOutcome::TimedOut { .. } = store
            .wait_until_nonzero(&ingestion_check_query(window.end), &policy)
            .await?
        {
            warn!("Gateway logs not ingested in time, report may be incomplete");
        }

        let mut processor = QueryProcessor::new(store.as_ref(), PortalLink::from_settings(&self.config.workspace));
        for query in report_queries(&window) {
            processor.add_query(query);
        }
        let report = processor.run_queries().await;

        // Pushed whether or not the report rendered
        let pushed = match &self.exporter {
            Some(exporter) => exporter.push().await,
            None => Ok(()),
        };

        self.sink.write_report(&report?);
        pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{Column, QueryTable, TimeSpan};
    use crate::report::MemoryReportSink;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeStore {
        count: i64,
        fail_reports: bool,
        queries: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn with_count(count: i64) -> Self {
            Self {
                count,
                fail_reports: false,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing_reports() -> Self {
            Self {
                fail_reports: true,
                ..Self::with_count(12)
            }
        }
    }

    impl Default for FakeStore {
        fn default() -> Self {
            Self::with_count(12)
        }
    }

    #[async_trait]
    impl LogStore for FakeStore {
        async fn run(&self, query: &str, _timespan: Option<&TimeSpan>) -> LoadTestResult<QueryTable> {
            self.queries.lock().push(query.to_string());
            if query.ends_with("| count") {
                return Ok(QueryTable {
                    columns: vec![Column {
                        name: "Count".to_string(),
                        column_type: "long".to_string(),
                    }],
                    rows: vec![vec![json!(self.count)]],
                });
            }
            if self.fail_reports {
                return Err(LoadTestError::UnexpectedStatus {
                    service: "log analytics",
                    status: 400,
                    body: "bad query".to_string(),
                });
            }

            let names = [
                "TimeGenerated",
                "label",
                "request_count",
                "max_remaining_tokens",
                "min_remaining_tokens",
                "avg_remaining_tokens",
                "number",
                "sliding_average",
            ];
            Ok(QueryTable {
                columns: names
                    .iter()
                    .map(|n| Column {
                        name: n.to_string(),
                        column_type: String::new(),
                    })
                    .collect(),
                rows: vec![
                    vec![json!("t0"), json!("low"), json!(3), json!(90), json!(10), json!(50), json!(4), json!(4)],
                    vec![json!("t1"), json!("high"), json!(5), json!(80), json!(20), json!(40), json!(6), json!(10)],
                ],
            })
        }
    }

    fn config(pairs: &[(&str, &str)]) -> LoadTestConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LoadTestConfig::from_source(vars).unwrap()
    }

    fn stopped_context() -> RunContext {
        RunContext {
            phase: crate::lifecycle::Phase::Stopped,
            started_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
            stopped_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 10, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_init_without_export_registers_nothing() {
        let scenario = PrioritizationScenario::new(config(&[]), reqwest::Client::new()).unwrap();
        let mut observers = ObserverRegistry::default();

        scenario.on_init(&mut observers).await.unwrap();
        assert!(observers.is_empty());
    }

    #[tokio::test]
    async fn test_init_with_export_registers_observer() {
        let scenario = PrioritizationScenario::new(
            config(&[("METRICS_EXPORT_ENDPOINT", "http://pushgateway:9091")]),
            reqwest::Client::new(),
        )
        .unwrap();
        let mut observers = ObserverRegistry::default();

        scenario.on_init(&mut observers).await.unwrap();
        assert_eq!(observers.len(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_payg1_endpoint() {
        let scenario = PrioritizationScenario::new(config(&[]), reqwest::Client::new()).unwrap();
        let err = scenario.on_test_start(&RunContext::default()).await.unwrap_err();
        assert!(matches!(err, LoadTestError::Config { .. }));
    }

    #[tokio::test]
    async fn test_stop_waits_then_reports() {
        let store = Arc::new(FakeStore::default());
        let sink = Arc::new(MemoryReportSink::default());
        let scenario = PrioritizationScenario::new(config(&[]), reqwest::Client::new())
            .unwrap()
            .with_log_store(store.clone())
            .with_report_sink(sink.clone());

        scenario.on_test_stop(&stopped_context()).await.unwrap();

        let queries = store.queries.lock().clone();
        assert_eq!(queries.len(), 5);
        assert!(queries[0].contains("datetime(2024-05-01T10:09:50Z)"));

        let report = sink.contents();
        assert!(report.contains("Overall request count"));
        assert!(report.contains("Successful request count by request type"));
        assert!(report.contains("Remaining tokens"));
        assert!(report.contains("Rate-limit tokens consumed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_after_ingestion_timeout() {
        let store = Arc::new(FakeStore::with_count(0));
        let sink = Arc::new(MemoryReportSink::default());
        let scenario = PrioritizationScenario::new(
            config(&[("RESULTS_WAIT_TIMEOUT_SECS", "20")]),
            reqwest::Client::new(),
        )
        .unwrap()
        .with_log_store(store.clone())
        .with_report_sink(sink.clone());

        scenario.on_test_stop(&stopped_context()).await.unwrap();

        let queries = store.queries.lock().clone();
        let polls = queries.iter().filter(|q| q.ends_with("| count")).count();
        assert!(polls > 1);
        assert_eq!(queries.len(), polls + 4);

        let report = sink.contents();
        assert!(report.contains("Overall request count"));
        assert!(report.contains("Successful request count by request type"));
        assert!(report.contains("Remaining tokens"));
        assert!(report.contains("Rate-limit tokens consumed"));
    }

    #[tokio::test]
    async fn test_stop_pushes_metrics_when_report_fails() {
        let gateway = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/metrics/job/apim-loadtest"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&gateway)
            .await;

        let sink = Arc::new(MemoryReportSink::default());
        let scenario = PrioritizationScenario::new(
            config(&[("METRICS_EXPORT_ENDPOINT", gateway.uri().as_str())]),
            reqwest::Client::new(),
        )
        .unwrap()
        .with_log_store(Arc::new(FakeStore::failing_reports()))
        .with_report_sink(sink.clone());

        let err = scenario.on_test_stop(&stopped_context()).await.unwrap_err();
        assert!(matches!(err, LoadTestError::UnexpectedStatus { status: 400, .. }));
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_workspace_is_config_error() {
        let scenario = PrioritizationScenario::new(config(&[]), reqwest::Client::new()).unwrap();
        let err = scenario.on_test_stop(&stopped_context()).await.unwrap_err();
        assert!(matches!(err, LoadTestError::Config { .. }));
    }

    #[tokio::test]
    async fn test_stop_requires_window() {
        let scenario = PrioritizationScenario::new(config(&[]), reqwest::Client::new())
            .unwrap()
            .with_log_store(Arc::new(FakeStore::default()));
        let err = scenario.on_test_stop(&RunContext::default()).await.unwrap_err();
        assert!(matches!(err, LoadTestError::InvalidState { .. }));
    }
}
