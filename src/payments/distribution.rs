//! External content distribution.
//!
//! After a grant is written, the distributor is told about it on a best-effort
//! basis. Nothing in the payment path waits on or depends on the result.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::error::PaymentError;
use super::rails::endpoint;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessNotice {
    pub user_id: String,
    pub video_id: String,
}

#[async_trait]
pub trait ContentDistributor: Send + Sync {
    async fn grant_access(&self, notice: &AccessNotice) -> Result<(), PaymentError>;

    async fn revoke_access(&self, notice: &AccessNotice) -> Result<(), PaymentError>;

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
pub struct OceanDropConfig {
    pub api_key: SecretString,
    pub base_url: url::Url,
    pub timeout: Duration,
}

impl OceanDropConfig {
    pub fn new(api_key: impl Into<String>, base_url: url::Url) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url,
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP client for the OceanDrop access API.
pub struct OceanDropClient {
    config: OceanDropConfig,
    client: reqwest::Client,
}

impl OceanDropClient {
    pub fn new(config: OceanDropConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::FulfillmentNotice {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { config, client })
    }

    async fn post(&self, path: &str, notice: &AccessNotice) -> Result<(), PaymentError> {
        let response = self
            .client
            .post(endpoint(&self.config.base_url, path))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(notice)
            .send()
            .await
            .map_err(|e| PaymentError::FulfillmentNotice {
                message: format!("OceanDrop request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::FulfillmentNotice {
                message: format!("OceanDrop API error: HTTP {}", status.as_u16()),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for OceanDropClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OceanDropClient")
            .field("base_url", &self.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentDistributor for OceanDropClient {
    async fn grant_access(&self, notice: &AccessNotice) -> Result<(), PaymentError> {
        self.post("access/grant", notice).await?;
        tracing::info!(
            target: "ossy::payments::distribution",
            user_id = %notice.user_id,
            video_id = %notice.video_id,
            "OceanDrop access granted"
        );
        Ok(())
    }

    async fn revoke_access(&self, notice: &AccessNotice) -> Result<(), PaymentError> {
        self.post("access/revoke", notice).await?;
        tracing::info!(
            target: "ossy::payments::distribution",
            user_id = %notice.user_id,
            video_id = %notice.video_id,
            "OceanDrop access revoked"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "oceandrop"
    }
}

/// Used when no distributor is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDistributor;

#[async_trait]
impl ContentDistributor for NoopDistributor {
    async fn grant_access(&self, _notice: &AccessNotice) -> Result<(), PaymentError> {
        Ok(())
    }

    async fn revoke_access(&self, _notice: &AccessNotice) -> Result<(), PaymentError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
