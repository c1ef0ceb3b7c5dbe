use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{LogStore, QueryTable, TimeSpan, TokenCredential};
use crate::error::{LoadTestError, LoadTestResult};

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timespan: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    tables: Vec<QueryTable>,
}

/// Log Analytics workspace query API client.
pub struct LogAnalyticsClient {
    client: reqwest::Client,
    query_url: Url,
    credential: Arc<dyn TokenCredential>,
}

impl LogAnalyticsClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        workspace_id: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> LoadTestResult<Self> {
        let mut base = endpoint.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let query_url = Url::parse(&base)?.join(&format!("v1/workspaces/{}/query", workspace_id))?;

        Ok(Self {
            client,
            query_url,
            credential,
        })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

#[async_trait]
impl LogStore for LogAnalyticsClient {
    async fn run(&self, query: &str, timespan: Option<&TimeSpan>) -> LoadTestResult<QueryTable> {
        let token = self.credential.token().await?;
        let body = QueryRequest {
            query,
            timespan: timespan.map(TimeSpan::to_iso8601),
        };

        let response = self
            .client
            .post(self.query_url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoadTestError::UnexpectedStatus {
                service: "log analytics",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = response.json().await?;
        let table = parsed
            .tables
            .into_iter()
            .next()
            .ok_or_else(|| LoadTestError::Query("response contained no tables".to_string()))?;

        debug!("Query returned {} rows", table.rows.len());
        Ok(table)
    }
}
