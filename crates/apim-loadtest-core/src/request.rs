//! Request generation: one embedding or chat call per simulated-user tick.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Serialize;
use tracing::error;
use url::Url;

use crate::error::{LoadTestError, LoadTestResult};
use crate::metrics::{MetricRecord, MetricSink};
use crate::priority::Priority;

/// API version used for every OpenAI call.
pub const API_VERSION: &str = "2023-05-15";

/// Header carrying the APIM product subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";

const EMBEDDING_INPUT: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. Habitant morbi tristique senectus et netus et malesuada. Bibendum neque egestas congue quisque egestas diam. Rutrum quisque non tellus orci ac auctor augue. Diam in arcu cursus euismod quis. Euismod elementum nisi quis eleifend quam adipiscing. Posuere lorem ipsum dolor sit amet consectetur adipiscing elit duis. Pretium vulputate sapien nec sagittis aliquam malesuada bibendum arcu. Adipiscing diam donec adipiscing tristique risus nec. Nec ultrices dui sapien eget mi proin. Odio facilisis mauris sit amet. Eget aliquet nibh praesent tristique magna. Malesuada nunc vel risus commodo viverra maecenas accumsan lacus vel. Maecenas volutpat blandit aliquam etiam erat velit scelerisque in dictum. Venenatis tellus in metus vulputate. Aliquet enim tortor at auctor urna nunc id cursus metus. Sed velit dignissim sodales ut eu sem integer vitae justo.";

const CHAT_PROMPT: &str = "Lorem ipsum dolor sit amet?";

/// Kind of OpenAI call issued by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Embeddings,
    Chat,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embeddings => "embeddings",
            Self::Chat => "chat",
        }
    }
}

impl FromStr for RequestKind {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embeddings" => Ok(Self::Embeddings),
            "chat" => Ok(Self::Chat),
            other => Err(LoadTestError::UnknownRequestType(other.to_string())),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated description of the request every simulated user sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    kind: RequestKind,
    deployment: String,
    max_tokens: Option<u32>,
}

impl RequestSpec {
    /// Validates raw request settings. `max_tokens <= 0` means unset; a
    /// positive value is only valid for chat requests.
    pub fn new(kind: RequestKind, deployment: impl Into<String>, max_tokens: i64) -> LoadTestResult<Self> {
        let max_tokens = if max_tokens > 0 {
            if kind != RequestKind::Chat {
                return Err(LoadTestError::config(
                    "max tokens should not be set for non-chat requests",
                ));
            }
            let value = u32::try_from(max_tokens)
                .map_err(|_| LoadTestError::config(format!("max tokens {} is too large", max_tokens)))?;
            Some(value)
        } else {
            None
        };

        let deployment = deployment.into();
        if deployment.trim().is_empty() {
            return Err(LoadTestError::config("deployment name cannot be empty"));
        }

        Ok(Self {
            kind,
            deployment,
            max_tokens,
        })
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    /// Path and query relative to the gateway base URL.
    pub fn path(&self) -> String {
        match self.kind {
            RequestKind::Embeddings => format!(
                "openai/deployments/{}/embeddings?api-version={}",
                self.deployment, API_VERSION
            ),
            RequestKind::Chat => format!(
                "openai/deployments/{}/chat/completions?api-version={}",
                self.deployment, API_VERSION
            ),
        }
    }

    pub fn payload(&self) -> RequestPayload {
        match self.kind {
            RequestKind::Embeddings => RequestPayload::Embedding(EmbeddingPayload {
                input: EMBEDDING_INPUT,
                model: "embedding",
            }),
            RequestKind::Chat => RequestPayload::Chat(ChatPayload {
                messages: vec![ChatMessage {
                    role: "user",
                    content: CHAT_PROMPT,
                }],
                model: "gpt-35-turbo",
                max_tokens: self.max_tokens,
            }),
        }
    }
}

/// JSON body of a generated request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RequestPayload {
    Embedding(EmbeddingPayload),
    Chat(ChatPayload),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbeddingPayload {
    pub input: &'static str,
    pub model: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatPayload {
    pub messages: Vec<ChatMessage>,
    pub model: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: &'static str,
}

/// Completed HTTP exchange, whatever its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: StatusCode,
    pub latency: Duration,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Issues requests against the gateway and records one metric per response.
pub struct RequestGenerator {
    client: reqwest::Client,
    url: Url,
    subscription_key: String,
    spec: RequestSpec,
    sink: Arc<dyn MetricSink>,
}

impl RequestGenerator {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        subscription_key: impl Into<String>,
        spec: RequestSpec,
        sink: Arc<dyn MetricSink>,
    ) -> LoadTestResult<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base)?.join(&spec.path())?;

        Ok(Self {
            client,
            url,
            subscription_key: subscription_key.into(),
            spec,
            sink,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    /// Builds the request for `priority` without sending it.
    pub fn build(&self, priority: Priority) -> LoadTestResult<reqwest::Request> {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .json(&self.spec.payload());

        if let Some(value) = priority.header_value() {
            builder = builder.header(Priority::HEADER, value);
        }

        Ok(builder.build()?)
    }

    /// Sends one request. Any HTTP response is an `Ok` outcome; transport
    /// failures are logged and returned without retrying. A response whose
    /// body cannot be read still gets its metric record.
    pub async fn send(&self, priority: Priority) -> LoadTestResult<RequestOutcome> {
        let request = self.build(priority)?;
        let start = Instant::now();

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("{} request ({} priority) failed: {}", self.spec.kind, priority, e);
                return Err(e.into());
            }
        };

        // Recorded once a status exists, even if the body later fails
        let status = response.status();
        self.sink.record(&MetricRecord {
            status_code: status.as_u16(),
            priority,
            request_kind: self.spec.kind,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        });

        if let Err(e) = response.bytes().await {
            error!(
                "{} request ({} priority) returned {} but the body failed: {}",
                self.spec.kind, priority, status, e
            );
            return Err(e.into());
        }

        Ok(RequestOutcome {
            status,
            latency: start.elapsed(),
        })
    }
}
