//! Portal deep links that open a query in the Log Analytics blade.

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use url::form_urlencoded::byte_serialize;

use crate::analytics::TimeSpan;
use crate::config::WorkspaceSettings;
use crate::error::LoadTestResult;

/// Workspace coordinates needed to build a portal link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalLink {
    tenant_id: String,
    subscription_id: String,
    resource_group_name: String,
    workspace_name: String,
}

impl PortalLink {
    pub fn new(
        tenant_id: impl Into<String>,
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        workspace_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            workspace_name: workspace_name.into(),
        }
    }

    /// Link builder for the configured workspace, if all coordinates are set.
    pub fn from_settings(settings: &WorkspaceSettings) -> Option<Self> {
        Some(Self::new(
            settings.tenant_id.clone()?,
            settings.subscription_id.clone()?,
            settings.resource_group_name.clone()?,
            settings.workspace_name.clone()?,
        ))
    }

    /// URL opening `query` over `timespan` in the portal.
    pub fn url(&self, query: &str, timespan: &TimeSpan) -> LoadTestResult<String> {
        let resource_id = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.OperationalInsights/workspaces/{}",
            self.subscription_id, self.resource_group_name, self.workspace_name
        );

        Ok(format!(
            "https://portal.azure.com#@{}/blade/Microsoft_OperationsManagementSuite_Workspace/Logs.ReactView/resourceId/{}/source/LogsBlade.AnalyticsShareLinkToQuery/q/{}/timespan/{}",
            self.tenant_id,
            encode(&resource_id),
            encode(&compress_query(query)?),
            encode(&timespan.to_iso8601()),
        ))
    }
}

/// Gzip then base64 encode a query, as the portal expects in `q/`.
pub fn compress_query(query: &str) -> LoadTestResult<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(query.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_compressed_query_decodes() {
        let encoded = compress_query("ApiManagementGatewayLogs | count").unwrap();
        let bytes = BASE64.decode(encoded).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "ApiManagementGatewayLogs | count");
    }

    #[test]
    fn test_url_layout() {
        let link = PortalLink::new("tenant", "sub", "rg", "ws");
        let span = TimeSpan::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 10, 0).unwrap(),
        );
        let url = link.url("AppMetrics", &span).unwrap();

        assert!(url.starts_with("https://portal.azure.com#@tenant/blade/"));
        assert!(url.contains(
            "/resourceId/%2Fsubscriptions%2Fsub%2FresourceGroups%2Frg%2Fproviders%2FMicrosoft.OperationalInsights%2Fworkspaces%2Fws/"
        ));
        assert!(url.ends_with("/timespan/2024-05-01T10%3A00%3A00Z%2F2024-05-01T10%3A10%3A00Z"));
    }

    #[test]
    fn test_from_settings_requires_all_parts() {
        let mut settings = WorkspaceSettings {
            tenant_id: Some("t".to_string()),
            subscription_id: Some("s".to_string()),
            resource_group_name: Some("rg".to_string()),
            workspace_id: None,
            workspace_name: None,
        };
        assert!(PortalLink::from_settings(&settings).is_none());

        settings.workspace_name = Some("ws".to_string());
        assert!(PortalLink::from_settings(&settings).is_some());
    }
}
