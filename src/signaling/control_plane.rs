//! HTTP client for the control-plane gateway.
//!
//! The gateway mints short-lived credentials, stores settings, and proxies
//! the currency rate. Credential failures are fatal to the attempted call;
//! rate failures are recovered locally with a fixed fallback and never
//! surfaced.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::errors::SignalingError;
use crate::usage::FALLBACK_EXCHANGE_RATE;

/// Client for the control-plane gateway endpoints.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: f64,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("HTTP client construction cannot fail with static options");
        Self { base_url: base_url.trim_end_matches('/').to_string(), http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request a short-lived credential scoped to `model`/`voice`.
    pub async fn create_credential(
        &self,
        model: &str,
        voice: &str,
    ) -> Result<String, SignalingError> {
        let url = format!("{}/session", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "model": model, "voice": voice }))
            .send()
            .await
            .map_err(|e| SignalingError::Credential(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SignalingError::Credential(format!("HTTP {}: {}", status, body)));
        }

        let parsed: CredentialResponse = resp
            .json()
            .await
            .map_err(|e| SignalingError::Credential(format!("bad credential response: {}", e)))?;

        Ok(parsed.client_secret.value)
    }

    /// Fetch the currency conversion rate, falling back to the fixed default
    /// on any failure.
    pub async fn fetch_exchange_rate(&self) -> f64 {
        let url = format!("{}/rate", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<RateResponse>().await {
                Ok(parsed) => {
                    debug!("Exchange rate: {}", parsed.rate);
                    parsed.rate
                }
                Err(e) => {
                    warn!("Bad rate response: {} — using fallback", e);
                    FALLBACK_EXCHANGE_RATE
                }
            },
            Ok(resp) => {
                warn!("Rate lookup returned HTTP {} — using fallback", resp.status());
                FALLBACK_EXCHANGE_RATE
            }
            Err(e) => {
                warn!("Rate lookup failed: {} — using fallback", e);
                FALLBACK_EXCHANGE_RATE
            }
        }
    }

    /// Load stored settings, or `None` when nothing is stored or the
    /// document does not parse.
    pub async fn fetch_settings(&self) -> Option<SessionConfig> {
        let url = format!("{}/settings", self.base_url);
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body = resp.text().await.ok()?;
        if body.trim() == "{}" {
            return None;
        }
        match serde_json::from_str(&body) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!("Stored settings did not parse: {}", e);
                None
            }
        }
    }

    /// Persist settings to the gateway store.
    pub async fn store_settings(&self, config: &SessionConfig) -> anyhow::Result<()> {
        let url = format!("{}/settings", self.base_url);
        let resp = self.http.post(&url).json(config).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("settings save returned HTTP {}", resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ControlPlaneClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_rate_fallback_when_gateway_unreachable() {
        // Nothing listens on this port.
        let client = ControlPlaneClient::new("http://127.0.0.1:9");
        let rate = client.fetch_exchange_rate().await;
        assert_eq!(rate, FALLBACK_EXCHANGE_RATE);
    }

    #[tokio::test]
    async fn test_credential_error_when_gateway_unreachable() {
        let client = ControlPlaneClient::new("http://127.0.0.1:9");
        let err = client.create_credential("gpt-realtime-2025-08-28", "verse").await.unwrap_err();
        assert!(matches!(err, SignalingError::Credential(_)));
    }
}
