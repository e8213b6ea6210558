//! Fiat gateway A: hosted invoices.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    ConfirmationOutcome, IntentRequest, PaymentRail, ProviderEvent, endpoint, http_client,
    read_provider_response, transport_error,
};
use crate::payments::error::PaymentError;
use crate::payments::types::PaymentMethod;

const DEFAULT_API_BASE: &str = "https://api.xendit.co";

#[derive(Debug)]
pub struct XenditConfig {
    pub secret_key: SecretString,
    pub api_base: url::Url,
    pub success_url: Option<String>,
    pub failure_url: Option<String>,
    pub timeout: Duration,
}

impl XenditConfig {
    pub fn new(secret_key: impl Into<String>) -> Result<Self, PaymentError> {
        Ok(Self {
            secret_key: SecretString::from(secret_key.into()),
            api_base: url::Url::parse(DEFAULT_API_BASE)
                .map_err(|e| PaymentError::validation(format!("invalid Xendit base URL: {}", e)))?,
            success_url: None,
            failure_url: None,
            timeout: Duration::from_secs(30),
        })
    }

    #[must_use]
    pub fn api_base(mut self, base: url::Url) -> Self {
        self.api_base = base;
        self
    }

    #[must_use]
    pub fn redirect_urls(mut self, success: Option<String>, failure: Option<String>) -> Self {
        self.success_url = success;
        self.failure_url = failure;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct XenditRail {
    config: XenditConfig,
    client: reqwest::Client,
}

impl XenditRail {
    pub fn new(config: XenditConfig) -> Result<Self, PaymentError> {
        let client = http_client(PaymentMethod::Xendit, config.timeout)?;
        Ok(Self { config, client })
    }
}

impl std::fmt::Debug for XenditRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XenditRail")
            .field("api_base", &self.config.api_base.as_str())
            .finish_non_exhaustive()
    }
}

fn payer_email(request: &IntentRequest) -> Result<&str, PaymentError> {
    request
        .payer_email
        .as_deref()
        .filter(|email| !email.trim().is_empty())
        .ok_or_else(|| PaymentError::validation("payerEmail is required for xendit"))
}

#[async_trait]
impl PaymentRail for XenditRail {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Xendit
    }

    fn validate_intent(&self, request: &IntentRequest) -> Result<(), PaymentError> {
        payer_email(request).map(|_| ())
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<Value, PaymentError> {
        let payer_email = payer_email(request)?;

        let mut body = json!({
            "external_id": request.transaction_id.as_str(),
            "amount": request.amount,
            "currency": request.currency,
            "payer_email": payer_email,
            "description": "Video purchase",
        });
        if let Some(url) = &self.config.success_url {
            body["success_redirect_url"] = json!(url);
        }
        if let Some(url) = &self.config.failure_url {
            body["failure_redirect_url"] = json!(url);
        }

        tracing::debug!(
            target: "ossy::payments::xendit",
            transaction_id = %request.transaction_id,
            "Creating invoice"
        );

        let response = self
            .client
            .post(endpoint(&self.config.api_base, "v2/invoices"))
            .basic_auth(self.config.secret_key.expose_secret(), Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PaymentMethod::Xendit, e))?;

        read_provider_response(PaymentMethod::Xendit, response).await
    }

    fn parse_event(&self, payload: &Value) -> Result<ProviderEvent, PaymentError> {
        XenditInvoiceCallback::deserialize(payload)
            .map(ProviderEvent::Xendit)
            .map_err(|e| PaymentError::malformed(PaymentMethod::Xendit, e.to_string()))
    }
}

/// Invoice callback body. Fields may sit at the top level or under `data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XenditInvoiceCallback {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<XenditInvoiceData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XenditInvoiceData {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl XenditInvoiceCallback {
    pub fn transaction_id(&self) -> Option<String> {
        self.external_id
            .clone()
            .or_else(|| self.data.as_ref().and_then(|d| d.external_id.clone()))
            .filter(|id| !id.is_empty())
    }

    fn status(&self) -> Option<&str> {
        self.status
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.status.as_deref()))
    }

    pub fn outcome(&self) -> ConfirmationOutcome {
        match self.status().map(str::to_ascii_uppercase).as_deref() {
            None | Some("PAID") | Some("SETTLED") => ConfirmationOutcome::Paid,
            Some(status @ ("EXPIRED" | "FAILED")) => ConfirmationOutcome::Failed {
                reason: status.to_ascii_lowercase(),
            },
            Some(other) => ConfirmationOutcome::Ignored {
                event_type: other.to_string(),
            },
        }
    }
}
