//! Fiat gateway B: source-based payments.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    ConfirmationOutcome, IntentRequest, PaymentRail, ProviderEvent, endpoint, http_client,
    read_provider_response, transport_error,
};
use crate::payments::error::PaymentError;
use crate::payments::types::PaymentMethod;

const DEFAULT_API_BASE: &str = "https://api.paymongo.com";

/// Largest amount accepted, in minor units.
const MAX_MINOR_UNITS: i64 = 9_999_999_999;

#[derive(Debug)]
pub struct PaymongoConfig {
    pub secret_key: SecretString,
    pub api_base: url::Url,
    pub timeout: Duration,
}

impl PaymongoConfig {
    pub fn new(secret_key: impl Into<String>) -> Result<Self, PaymentError> {
        Ok(Self {
            secret_key: SecretString::from(secret_key.into()),
            api_base: url::Url::parse(DEFAULT_API_BASE)
                .map_err(|e| PaymentError::validation(format!("invalid PayMongo base URL: {}", e)))?,
            timeout: Duration::from_secs(30),
        })
    }

    #[must_use]
    pub fn api_base(mut self, base: url::Url) -> Self {
        self.api_base = base;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct PaymongoRail {
    config: PaymongoConfig,
    client: reqwest::Client,
}

impl PaymongoRail {
    pub fn new(config: PaymongoConfig) -> Result<Self, PaymentError> {
        let client = http_client(PaymentMethod::Paymongo, config.timeout)?;
        Ok(Self { config, client })
    }
}

impl std::fmt::Debug for PaymongoRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymongoRail")
            .field("api_base", &self.config.api_base.as_str())
            .finish_non_exhaustive()
    }
}

/// Amounts are sent in minor units (centavos).
fn to_minor_units(amount: f64) -> Result<i64, PaymentError> {
    let minor = (amount * 100.0).round();
    if !minor.is_finite() || minor < 1.0 || minor > MAX_MINOR_UNITS as f64 {
        return Err(PaymentError::validation(format!(
            "amount {} is outside the range accepted by paymongo",
            amount
        )));
    }
    // in range, so the cast is exact
    Ok(minor as i64)
}

fn source_type(request: &IntentRequest) -> Result<&str, PaymentError> {
    request
        .source_type
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| PaymentError::validation("sourceType is required for paymongo"))
}

#[async_trait]
impl PaymentRail for PaymongoRail {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paymongo
    }

    fn validate_intent(&self, request: &IntentRequest) -> Result<(), PaymentError> {
        source_type(request)?;
        to_minor_units(request.amount)?;
        Ok(())
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<Value, PaymentError> {
        let source_type = source_type(request)?;
        let amount = to_minor_units(request.amount)?;

        let mut source = Map::new();
        source.insert("type".to_string(), json!(source_type));
        for (key, value) in &request.details {
            if key != "type" {
                source.insert(key.clone(), value.clone());
            }
        }

        let body = json!({
            "data": {
                "attributes": {
                    "amount": amount,
                    "currency": request.currency,
                    "source": source,
                    "description": "Video purchase",
                    "metadata": { "transaction_id": request.transaction_id.as_str() },
                }
            }
        });

        tracing::debug!(
            target: "ossy::payments::paymongo",
            transaction_id = %request.transaction_id,
            source_type = source_type,
            "Creating payment"
        );

        let response = self
            .client
            .post(endpoint(&self.config.api_base, "v1/payments"))
            .basic_auth(self.config.secret_key.expose_secret(), Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PaymentMethod::Paymongo, e))?;

        read_provider_response(PaymentMethod::Paymongo, response).await
    }

    fn parse_event(&self, payload: &Value) -> Result<ProviderEvent, PaymentError> {
        PaymongoEvent::deserialize(payload)
            .map(ProviderEvent::Paymongo)
            .map_err(|e| PaymentError::malformed(PaymentMethod::Paymongo, e.to_string()))
    }
}

/// Webhook event envelope: `data.attributes` describes the event and
/// `data.attributes.data` is the resource it refers to.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymongoEvent {
    pub data: PaymongoEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymongoEventData {
    #[serde(default)]
    pub id: Option<String>,
    pub attributes: PaymongoEventAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymongoEventAttributes {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub client_ref_id: Option<String>,
    #[serde(default)]
    pub data: Option<PaymongoResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymongoResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: PaymongoResourceAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymongoResourceAttributes {
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub failed_message: Option<String>,
}

impl PaymongoEvent {
    pub fn transaction_id(&self) -> Option<String> {
        let attributes = &self.data.attributes;
        attributes
            .client_ref_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| {
                attributes
                    .data
                    .as_ref()
                    .and_then(|resource| resource.attributes.metadata.as_ref())
                    .and_then(|metadata| metadata.get("transaction_id"))
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
    }

    pub fn outcome(&self) -> ConfirmationOutcome {
        match self.data.attributes.event_type.as_deref() {
            None | Some("payment.paid") => ConfirmationOutcome::Paid,
            Some("payment.failed") => ConfirmationOutcome::Failed {
                reason: self
                    .data
                    .attributes
                    .data
                    .as_ref()
                    .and_then(|r| r.attributes.failed_message.clone())
                    .unwrap_or_else(|| "payment.failed".to_string()),
            },
            Some(other) => ConfirmationOutcome::Ignored {
                event_type: other.to_string(),
            },
        }
    }
}
