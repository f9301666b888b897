//! Ingress proxy statistics client

use crate::models::NginxStats;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Path of the statistics endpoint relative to the configured base URL
const STATS_PATH: &str = "/api/v1/nginx/stats";

/// Request deadline for the statistics endpoint
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the proxy statistics endpoint
#[derive(Debug, Clone)]
pub struct NginxStatsClient {
    client: Client,
    base_url: String,
}

impl NginxStatsClient {
    /// Create a client for the given base URL
    pub fn new(base_url: &str) -> Result<Self> {
        // Validate the URL up front so a typo fails at startup, not per cycle
        Url::parse(base_url).context("invalid proxy statistics URL")?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current statistics; non-200 or undecodable bodies are errors
    pub async fn stats(&self) -> Result<NginxStats> {
        let url = format!("{}{}", self.base_url, STATS_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("proxy statistics request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("proxy statistics endpoint returned status {status}");
        }

        response
            .json::<NginxStats>()
            .await
            .context("failed to decode proxy statistics body")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        assert!(NginxStatsClient::new("not a url").is_err());
    }

    #[test]
    fn test_strips_trailing_slash() {
        let client = NginxStatsClient::new("http://ingress-nginx.ingress:8080/").unwrap();
        assert_eq!(client.base_url, "http://ingress-nginx.ingress:8080");
    }

    #[test]
    fn test_stats_payload_decodes() {
        let body = r#"{
            "requests_per_second": 125.4,
            "response_time": 342.0,
            "error_rate": 1.2,
            "active_connections": 87,
            "bytes_per_second": 2097152.0,
            "upstream_metrics": {"upstream_bytes_per_second": 1048576.0}
        }"#;
        let stats: NginxStats = serde_json::from_str(body).unwrap();
        assert!((stats.requests_per_second - 125.4).abs() < 1e-9);
        assert_eq!(stats.active_connections, 87);
        assert_eq!(
            stats.upstream_metrics.get("upstream_bytes_per_second"),
            Some(&1048576.0)
        );
    }
}
