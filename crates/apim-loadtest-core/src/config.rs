//! Environment-driven configuration for the load harness
//!
//! Settings are read once at process start from the process environment
//! (or an explicit map in tests), defaulted, then converted into typed,
//! validated structures. Anything inconsistent fails here, before a single
//! request is sent.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::{LoadTestError, LoadTestResult};
use crate::request::{RequestKind, RequestSpec};
use crate::stage::{LoadPattern, StageSchedule};

/// Environment variables the harness reads.
pub const ENV_KEYS: &[&str] = &[
    "APIM_SUBSCRIPTION_ONE_KEY",
    "APIM_SUBSCRIPTION_TWO_KEY",
    "APIM_SUBSCRIPTION_THREE_KEY",
    "APIM_ENDPOINT",
    "SIMULATOR_ENDPOINT_PTU1",
    "SIMULATOR_ENDPOINT_PAYG1",
    "SIMULATOR_ENDPOINT_PAYG2",
    "SIMULATOR_API_KEY",
    "TENANT_ID",
    "SUBSCRIPTION_ID",
    "RESOURCE_GROUP_NAME",
    "LOG_ANALYTICS_WORKSPACE_ID",
    "LOG_ANALYTICS_WORKSPACE_NAME",
    "LOG_ANALYTICS_ENDPOINT",
    "LOG_ANALYTICS_ACCESS_TOKEN",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_AUTHORITY_HOST",
    "METRICS_EXPORT_ENDPOINT",
    "RESULTS_WAIT_TIMEOUT_SECS",
    "LOAD_PATTERN",
    "RAMP_RATE",
    "REQUEST_TYPE",
    "MAX_TOKENS",
    "DEPLOYMENT_NAME",
];

/// Raw view of the environment, one field per variable.
#[derive(Debug, Clone, Deserialize)]
struct EnvSettings {
    apim_subscription_one_key: Option<String>,
    apim_subscription_two_key: Option<String>,
    apim_subscription_three_key: Option<String>,
    apim_endpoint: Option<String>,
    simulator_endpoint_ptu1: Option<String>,
    simulator_endpoint_payg1: Option<String>,
    simulator_endpoint_payg2: Option<String>,
    simulator_api_key: Option<String>,
    tenant_id: Option<String>,
    subscription_id: Option<String>,
    resource_group_name: Option<String>,
    log_analytics_workspace_id: Option<String>,
    log_analytics_workspace_name: Option<String>,
    log_analytics_endpoint: String,
    log_analytics_access_token: Option<String>,
    azure_client_id: Option<String>,
    azure_client_secret: Option<String>,
    azure_authority_host: String,
    metrics_export_endpoint: Option<String>,
    results_wait_timeout_secs: u64,
    load_pattern: String,
    ramp_rate: u32,
    request_type: String,
    max_tokens: i64,
    deployment_name: String,
}

/// Root configuration for a run.
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub apim: ApimSettings,
    pub simulator: SimulatorSettings,
    pub workspace: WorkspaceSettings,
    pub analytics: AnalyticsSettings,
    pub load: LoadSettings,

    /// Push-gateway URL; when set, per-request metrics are exported.
    pub metrics_export_endpoint: Option<String>,
}

/// API Management gateway settings.
#[derive(Debug, Clone, Default)]
pub struct ApimSettings {
    pub endpoint: Option<String>,
    pub subscription_one_key: Option<String>,
    pub subscription_two_key: Option<String>,
    pub subscription_three_key: Option<String>,
}

/// Simulated OpenAI backend settings.
#[derive(Debug, Clone, Default)]
pub struct SimulatorSettings {
    pub endpoint_ptu1: Option<String>,
    pub endpoint_payg1: Option<String>,
    pub endpoint_payg2: Option<String>,
    pub api_key: Option<String>,
}

/// Identity of the Log Analytics workspace holding gateway logs.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSettings {
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    pub resource_group_name: Option<String>,
    pub workspace_id: Option<String>,
    pub workspace_name: Option<String>,
}

/// How to reach and authenticate against the analytics query API.
#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub endpoint: String,
    pub authority_host: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,

    /// Ceiling for the wait on log ingestion after the run.
    pub wait_timeout: Duration,
}

/// Shape and content of the generated load.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub pattern: LoadPattern,
    pub ramp_rate: u32,
    pub request: RequestSpec,
}

impl LoadSettings {
    pub fn schedule(&self) -> StageSchedule {
        self.pattern.schedule(self.ramp_rate)
    }
}

impl LoadTestConfig {
    /// Load configuration from the process environment.
    pub fn load() -> LoadTestResult<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| ENV_KEYS.contains(&key.as_str()))
            .collect();
        Self::from_source(vars)
    }

    /// Load configuration from an explicit variable map.
    pub fn from_source(vars: HashMap<String, String>) -> LoadTestResult<Self> {
        let builder = Config::builder()
            .set_default("log_analytics_endpoint", "https://api.loganalytics.io")?
            .set_default("azure_authority_host", "https://login.microsoftonline.com")?
            .set_default("results_wait_timeout_secs", 300)?
            .set_default("load_pattern", "cycle")?
            .set_default("ramp_rate", 1)?
            .set_default("request_type", "embeddings")?
            .set_default("max_tokens", -1)?
            .set_default("deployment_name", "embedding100k")?
            .add_source(Environment::default().source(Some(vars)));

        let raw: EnvSettings = builder.build()?.try_deserialize()?;
        Self::try_from_env(raw)
    }

    fn try_from_env(raw: EnvSettings) -> LoadTestResult<Self> {
        let pattern: LoadPattern = raw.load_pattern.trim().parse()?;
        let kind: RequestKind = raw.request_type.trim().parse()?;
        let request = RequestSpec::new(kind, raw.deployment_name, raw.max_tokens)?;

        if raw.ramp_rate == 0 {
            return Err(LoadTestError::config("RAMP_RATE must be > 0"));
        }

        Ok(Self {
            apim: ApimSettings {
                endpoint: non_empty(raw.apim_endpoint),
                subscription_one_key: non_empty(raw.apim_subscription_one_key),
                subscription_two_key: non_empty(raw.apim_subscription_two_key),
                subscription_three_key: non_empty(raw.apim_subscription_three_key),
            },
            simulator: SimulatorSettings {
                endpoint_ptu1: non_empty(raw.simulator_endpoint_ptu1),
                endpoint_payg1: non_empty(raw.simulator_endpoint_payg1),
                endpoint_payg2: non_empty(raw.simulator_endpoint_payg2),
                api_key: non_empty(raw.simulator_api_key),
            },
            workspace: WorkspaceSettings {
                tenant_id: non_empty(raw.tenant_id),
                subscription_id: non_empty(raw.subscription_id),
                resource_group_name: non_empty(raw.resource_group_name),
                workspace_id: non_empty(raw.log_analytics_workspace_id),
                workspace_name: non_empty(raw.log_analytics_workspace_name),
            },
            analytics: AnalyticsSettings {
                endpoint: raw.log_analytics_endpoint,
                authority_host: raw.azure_authority_host,
                client_id: non_empty(raw.azure_client_id),
                client_secret: non_empty(raw.azure_client_secret),
                access_token: non_empty(raw.log_analytics_access_token),
                wait_timeout: Duration::from_secs(raw.results_wait_timeout_secs),
            },
            load: LoadSettings {
                pattern,
                ramp_rate: raw.ramp_rate,
                request,
            },
            metrics_export_endpoint: non_empty(raw.metrics_export_endpoint),
        })
    }

    /// Whether per-request metrics export is configured.
    pub fn metrics_export_enabled(&self) -> bool {
        self.metrics_export_endpoint.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = LoadTestConfig::from_source(HashMap::new()).unwrap();

        assert_eq!(config.load.pattern, LoadPattern::Cycle);
        assert_eq!(config.load.ramp_rate, 1);
        assert_eq!(config.load.request.kind(), RequestKind::Embeddings);
        assert_eq!(config.load.request.max_tokens(), None);
        assert_eq!(config.load.request.deployment(), "embedding100k");
        assert_eq!(config.analytics.endpoint, "https://api.loganalytics.io");
        assert_eq!(config.analytics.wait_timeout, Duration::from_secs(300));
        assert!(!config.metrics_export_enabled());
    }

    #[test]
    fn test_reads_named_settings() {
        let config = LoadTestConfig::from_source(vars(&[
            ("APIM_ENDPOINT", "https://apim.example.net"),
            ("APIM_SUBSCRIPTION_ONE_KEY", "key-one"),
            ("SIMULATOR_ENDPOINT_PAYG1", "https://sim-payg1.example.net"),
            ("SIMULATOR_API_KEY", "sim-key"),
            ("LOG_ANALYTICS_WORKSPACE_ID", "ws-id"),
            ("LOAD_PATTERN", "low-priority"),
            ("RAMP_RATE", "2"),
            ("METRICS_EXPORT_ENDPOINT", "http://pushgateway:9091"),
        ]))
        .unwrap();

        assert_eq!(config.apim.endpoint.as_deref(), Some("https://apim.example.net"));
        assert_eq!(config.apim.subscription_one_key.as_deref(), Some("key-one"));
        assert_eq!(
            config.simulator.endpoint_payg1.as_deref(),
            Some("https://sim-payg1.example.net")
        );
        assert_eq!(config.workspace.workspace_id.as_deref(), Some("ws-id"));
        assert_eq!(config.load.pattern, LoadPattern::LowPriority);
        assert_eq!(config.load.ramp_rate, 2);
        assert!(config.metrics_export_enabled());
    }

    #[test]
    fn test_chat_with_max_tokens() {
        let config = LoadTestConfig::from_source(vars(&[
            ("REQUEST_TYPE", "chat"),
            ("MAX_TOKENS", "50"),
        ]))
        .unwrap();

        assert_eq!(config.load.request.kind(), RequestKind::Chat);
        assert_eq!(config.load.request.max_tokens(), Some(50));
    }

    #[test]
    fn test_embeddings_with_max_tokens_is_rejected() {
        let err = LoadTestConfig::from_source(vars(&[
            ("REQUEST_TYPE", "embeddings"),
            ("MAX_TOKENS", "10"),
        ]))
        .unwrap_err();

        assert!(matches!(err, LoadTestError::Config { .. }));
    }

    #[test]
    fn test_unknown_pattern_is_rejected() {
        let err = LoadTestConfig::from_source(vars(&[("LOAD_PATTERN", "burst")])).unwrap_err();
        assert!(matches!(err, LoadTestError::UnknownLoadPattern(_)));
    }

    #[test]
    fn test_unknown_request_type_is_rejected() {
        let err =
            LoadTestConfig::from_source(vars(&[("REQUEST_TYPE", "completions")])).unwrap_err();
        assert!(matches!(err, LoadTestError::UnknownRequestType(_)));
    }

    #[test]
    fn test_zero_ramp_rate_is_rejected() {
        assert!(LoadTestConfig::from_source(vars(&[("RAMP_RATE", "0")])).is_err());
    }

    #[test]
    fn test_secret_values_kept_verbatim() {
        let config = LoadTestConfig::from_source(vars(&[
            ("APIM_SUBSCRIPTION_ONE_KEY", "0123456789"),
            ("SIMULATOR_API_KEY", "12e3"),
            ("AZURE_CLIENT_SECRET", "true"),
        ]))
        .unwrap();

        assert_eq!(config.apim.subscription_one_key.as_deref(), Some("0123456789"));
        assert_eq!(config.simulator.api_key.as_deref(), Some("12e3"));
        assert_eq!(config.analytics.client_secret.as_deref(), Some("true"));
    }

    #[test]
    fn test_numeric_settings_parse_from_strings() {
        let config = LoadTestConfig::from_source(vars(&[
            ("RAMP_RATE", "3"),
            ("RESULTS_WAIT_TIMEOUT_SECS", "20"),
            ("REQUEST_TYPE", "chat"),
            ("MAX_TOKENS", "-1"),
        ]))
        .unwrap();

        assert_eq!(config.load.ramp_rate, 3);
        assert_eq!(config.analytics.wait_timeout, Duration::from_secs(20));
        assert_eq!(config.load.request.max_tokens(), None);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = LoadTestConfig::from_source(vars(&[("APIM_ENDPOINT", "  ")])).unwrap();
        assert!(config.apim.endpoint.is_none());
    }
}
