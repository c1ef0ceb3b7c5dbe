//! Control calls against the simulated OpenAI backend.

use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::{LoadTestError, LoadTestResult};

/// Baseline chat-completions latency applied at test start.
pub const BASELINE_CHAT_COMPLETIONS_LATENCY: f64 = 1.0;

const DEFAULT_STD_DEV: f64 = 0.1;

#[derive(Debug, Serialize)]
struct ConfigPatch {
    latency: LatencyPatch,
}

#[derive(Debug, Serialize)]
struct LatencyPatch {
    open_ai_chat_completions: LatencySettings,
}

#[derive(Debug, Serialize)]
struct LatencySettings {
    mean: f64,
    std_dev: f64,
}

/// Client for the simulator's runtime configuration endpoint.
#[derive(Debug, Clone)]
pub struct SimulatorClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl SimulatorClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    /// Sets the artificial chat-completions latency on the simulator behind
    /// `endpoint`.
    pub async fn set_chat_completions_latency(&self, endpoint: &str, mean: f64) -> LoadTestResult<()> {
        let url = config_url(endpoint)?;
        let body = ConfigPatch {
            latency: LatencyPatch {
                open_ai_chat_completions: LatencySettings {
                    mean,
                    std_dev: DEFAULT_STD_DEV,
                },
            },
        };

        let mut request = self.client.patch(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoadTestError::UnexpectedStatus {
                service: "simulator",
                status: status.as_u16(),
                body,
            });
        }

        info!("Simulator {} chat completions latency set to {}", endpoint, mean);
        Ok(())
    }
}

fn config_url(endpoint: &str) -> LoadTestResult<Url> {
    let mut base = endpoint.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join("++/config")?)
}
