//! Payment rails.
//!
//! A rail turns a generic intent into a provider-specific call and turns the
//! provider's confirmation payload back into a typed [`ProviderEvent`]. The
//! orchestrator only ever sees [`Confirmation`]s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::PaymentError;
use super::types::{PaymentMethod, TransactionId};

pub mod crypto;
pub mod paymongo;
pub mod xendit;

pub use crypto::{CryptoConfig, CryptoRail, CryptoSettlement, TransactionReceipt};
pub use paymongo::{PaymongoConfig, PaymongoEvent, PaymongoRail};
pub use xendit::{XenditConfig, XenditInvoiceCallback, XenditRail};

/// Generic "create payment" request handed to a rail.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    /// Ledger id. Persisted as `pending` before `create_intent` is called;
    /// rails echo it to the provider so confirmations can be matched back.
    pub transaction_id: TransactionId,
    pub amount: f64,
    pub currency: String,
    pub payer_email: Option<String>,
    pub source_type: Option<String>,
    /// Provider-specific fields. A rail reads only the keys it owns.
    pub details: Map<String, Value>,
}

/// What a provider event means for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Paid,
    Failed { reason: String },
    /// A well-formed event that does not settle the payment.
    Ignored { event_type: String },
}

/// A provider event reduced to the ledger's vocabulary.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub method: PaymentMethod,
    pub transaction_id: TransactionId,
    pub outcome: ConfirmationOutcome,
    /// Full provider payload, stored on the transaction.
    pub payload: Value,
}

/// Typed provider payloads, keyed by provider identity.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Xendit(XenditInvoiceCallback),
    Paymongo(PaymongoEvent),
    Crypto(CryptoSettlement),
}

impl ProviderEvent {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::Xendit(_) => PaymentMethod::Xendit,
            Self::Paymongo(_) => PaymentMethod::Paymongo,
            Self::Crypto(_) => PaymentMethod::Crypto,
        }
    }

    /// Apply the provider's field mapping.
    pub fn into_confirmation(self, payload: Value) -> Result<Confirmation, PaymentError> {
        let method = self.method();
        let (raw_id, outcome) = match self {
            Self::Xendit(event) => (event.transaction_id(), event.outcome()),
            Self::Paymongo(event) => (event.transaction_id(), event.outcome()),
            Self::Crypto(event) => (Some(event.transaction_id.to_string()), event.outcome()),
        };

        let raw_id = raw_id.ok_or_else(|| PaymentError::malformed(method, "transaction id field is absent"))?;
        let transaction_id = TransactionId::parse(&raw_id)
            .map_err(|_| PaymentError::malformed(method, format!("malformed transaction id '{}'", raw_id)))?;

        Ok(Confirmation {
            method,
            transaction_id,
            outcome,
            payload,
        })
    }
}

/// Result of waiting for a synchronous rail to settle.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The rail settles through webhooks; nothing to wait for.
    Deferred,
    Settled(Confirmation),
    /// No answer within the settlement window. The row stays `pending`.
    TimedOut,
}

/// Uniform interface over heterogeneous payment rails.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Check the provider-specific fields of `request` without calling out.
    ///
    /// Runs before the ledger row is written. `create_intent` re-checks.
    fn validate_intent(&self, request: &IntentRequest) -> Result<(), PaymentError> {
        let _ = request;
        Ok(())
    }

    /// Create the provider-side intent. The returned payload is stored on
    /// the transaction without interpretation.
    async fn create_intent(&self, request: &IntentRequest) -> Result<Value, PaymentError>;

    /// Decode a verified webhook payload.
    fn parse_event(&self, payload: &Value) -> Result<ProviderEvent, PaymentError> {
        let _ = payload;
        Err(PaymentError::malformed(self.method(), "rail has no webhook channel"))
    }

    /// Decode raw webhook bytes into a [`Confirmation`].
    fn parse_confirmation(&self, raw_body: &[u8]) -> Result<Confirmation, PaymentError> {
        let payload: Value = serde_json::from_slice(raw_body)
            .map_err(|e| PaymentError::malformed(self.method(), format!("invalid JSON: {}", e)))?;
        self.parse_event(&payload)?.into_confirmation(payload)
    }

    /// Block until the provider reports a final outcome.
    ///
    /// Rails that settle asynchronously keep the default.
    async fn await_settlement(
        &self,
        transaction_id: &TransactionId,
        provider_response: &Value,
    ) -> Result<Settlement, PaymentError> {
        let _ = (transaction_id, provider_response);
        Ok(Settlement::Deferred)
    }
}

/// Configured rails, looked up by method.
#[derive(Clone, Default)]
pub struct RailRegistry {
    rails: HashMap<PaymentMethod, Arc<dyn PaymentRail>>,
}

impl RailRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rail(mut self, rail: Arc<dyn PaymentRail>) -> Self {
        self.register(rail);
        self
    }

    pub fn register(&mut self, rail: Arc<dyn PaymentRail>) {
        self.rails.insert(rail.method(), rail);
    }

    /// Fails with `UnsupportedMethod` for rails that are not configured.
    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentRail>, PaymentError> {
        self.rails
            .get(&method)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedMethod {
                method: method.to_string(),
            })
    }

    /// Configured methods in declaration order.
    pub fn methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|m| self.rails.contains_key(m))
            .collect()
    }
}

impl std::fmt::Debug for RailRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RailRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

/// Read a provider HTTP response as JSON.
///
/// Non-2xx responses become [`PaymentError::Provider`] carrying the body with
/// an `"error": true` marker so it can be stored against the transaction.
pub(crate) async fn read_provider_response(
    method: PaymentMethod,
    response: reqwest::Response,
) -> Result<Value, PaymentError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| PaymentError::provider(method, format!("failed to read response: {}", e)))?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

    if status.is_success() {
        return Ok(body);
    }

    let message = body
        .get("message")
        .or_else(|| body.pointer("/errors/0/detail"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("provider returned HTTP {}", status.as_u16()));

    Err(PaymentError::Provider {
        method,
        message,
        http_status: Some(status.as_u16()),
        response: Some(mark_error(body)),
    })
}

/// Map a transport failure to a provider error.
pub(crate) fn transport_error(method: PaymentMethod, err: reqwest::Error) -> PaymentError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        format!("request failed: {}", err)
    };
    PaymentError::provider(method, message)
}

pub(crate) fn mark_error(body: Value) -> Value {
    match body {
        Value::Object(mut map) => {
            map.insert("error".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        other => serde_json::json!({ "error": true, "body": other }),
    }
}

pub(crate) fn http_client(method: PaymentMethod, timeout: std::time::Duration) -> Result<reqwest::Client, PaymentError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::provider(method, format!("failed to build HTTP client: {}", e)))
}

/// Join `path` onto a base URL, keeping any base path segments.
pub(crate) fn endpoint(base: &url::Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
pub(crate) mod fake {
    //! Local stand-ins for provider HTTP APIs.

    use axum::Router;

    /// Serve `router` on an ephemeral port and return its base URL.
    pub async fn spawn(router: Router) -> url::Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        url::Url::parse(&format!("http://{}", addr)).unwrap()
    }
}
