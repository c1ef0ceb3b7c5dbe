use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::config::AnalyticsSettings;
use crate::error::{LoadTestError, LoadTestResult};

/// OAuth scope for the Log Analytics query API.
pub const LOG_ANALYTICS_SCOPE: &str = "https://api.loganalytics.io/.default";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of bearer tokens for the query API.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> LoadTestResult<String>;
}

/// Pre-acquired token, used as-is.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> LoadTestResult<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 client-credential flow against the Entra ID authority.
pub struct ClientSecretCredential {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientSecretCredential {
    pub fn new(
        client: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> LoadTestResult<Self> {
        let mut base = authority_host.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let token_url = Url::parse(&base)?.join(&format!("{}/oauth2/v2.0/token", tenant_id))?;

        Ok(Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: LOG_ANALYTICS_SCOPE.to_string(),
            cached: Mutex::new(None),
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    async fn fetch(&self) -> LoadTestResult<TokenResponse> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self.client.post(self.token_url.clone()).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoadTestError::Auth(format!(
                "token request failed with {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| LoadTestError::Auth(format!("invalid token response: {}", e)))
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> LoadTestResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!("Acquired analytics token valid for {}s", response.expires_in);

        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }
}

/// Picks a credential from settings: an explicit token wins, then client
/// id/secret for `tenant_id`.
pub fn credential_from_settings(
    client: reqwest::Client,
    settings: &AnalyticsSettings,
    tenant_id: Option<&str>,
) -> LoadTestResult<Arc<dyn TokenCredential>> {
    if let Some(token) = &settings.access_token {
        return Ok(Arc::new(StaticTokenCredential::new(token.clone())));
    }

    match (tenant_id, &settings.client_id, &settings.client_secret) {
        (Some(tenant), Some(id), Some(secret)) => Ok(Arc::new(ClientSecretCredential::new(
            client,
            &settings.authority_host,
            tenant,
            id.clone(),
            secret.clone(),
        )?)),
        _ => Err(LoadTestError::Auth(
            "no analytics credentials: set LOG_ANALYTICS_ACCESS_TOKEN or TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET"
                .to_string(),
        )),
    }
}
