//! On-chain rail over EVM JSON-RPC.
//!
//! The node signs with one of its managed accounts (`eth_sendTransaction`),
//! so no key material lives in this process. Unlike the fiat rails, funds
//! move during `create_intent`; the outcome is learned by polling for the
//! receipt within a bounded settlement window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    ConfirmationOutcome, IntentRequest, PaymentRail, ProviderEvent, Settlement, http_client,
    mark_error, read_provider_response, transport_error,
};
use crate::payments::error::PaymentError;
use crate::payments::types::{PaymentMethod, TransactionId};

#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub rpc_url: url::Url,
    /// Node-managed account funds are sent from.
    pub from_address: String,
    pub settlement_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl CryptoConfig {
    pub fn new(rpc_url: url::Url, from_address: impl Into<String>) -> Self {
        Self {
            rpc_url,
            from_address: from_address.into(),
            settlement_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn settlement_timeout(mut self, timeout: Duration) -> Self {
        self.settlement_timeout = timeout;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct CryptoRail {
    config: CryptoConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl CryptoRail {
    pub fn new(config: CryptoConfig) -> Result<Self, PaymentError> {
        if !is_address(&config.from_address) {
            return Err(PaymentError::validation(format!(
                "invalid sender address '{}'",
                config.from_address
            )));
        }
        let client = http_client(PaymentMethod::Crypto, config.request_timeout)?;
        Ok(Self {
            config,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, PaymentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .client
            .post(self.config.rpc_url.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PaymentMethod::Crypto, e))?;
        let envelope = read_provider_response(PaymentMethod::Crypto, response).await?;

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("JSON-RPC error")
                .to_string();
            return Err(PaymentError::Provider {
                method: PaymentMethod::Crypto,
                message: format!("{}: {}", method, message),
                http_status: None,
                response: Some(mark_error(json!({ "rpcError": error }))),
            });
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn poll_receipt(&self, tx_hash: &str) -> TransactionReceipt {
        loop {
            match self.rpc("eth_getTransactionReceipt", json!([tx_hash])).await {
                Ok(Value::Null) => {}
                Ok(value) => match TransactionReceipt::deserialize(&value) {
                    Ok(receipt) => return receipt,
                    Err(e) => tracing::warn!(
                        target: "ossy::payments::crypto",
                        tx_hash = tx_hash,
                        error = %e,
                        "Unreadable receipt, polling again"
                    ),
                },
                Err(e) => tracing::warn!(
                    target: "ossy::payments::crypto",
                    tx_hash = tx_hash,
                    error = %e,
                    "Receipt poll failed, polling again"
                ),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl PaymentRail for CryptoRail {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Crypto
    }

    fn validate_intent(&self, request: &IntentRequest) -> Result<(), PaymentError> {
        transfer_details(request).map(|_| ())
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<Value, PaymentError> {
        let (to, amount_wei) = transfer_details(request)?;

        tracing::info!(
            target: "ossy::payments::crypto",
            transaction_id = %request.transaction_id,
            to = to,
            amount_wei = %amount_wei,
            "Broadcasting transfer"
        );

        let result = self
            .rpc(
                "eth_sendTransaction",
                json!([{
                    "from": self.config.from_address,
                    "to": to,
                    "value": format!("0x{:x}", amount_wei),
                }]),
            )
            .await?;

        let tx_hash = result
            .as_str()
            .filter(|h| h.starts_with("0x"))
            .ok_or_else(|| PaymentError::provider(PaymentMethod::Crypto, "node returned no transaction hash"))?;

        Ok(json!({
            "txHash": tx_hash,
            "from": self.config.from_address,
            "to": to,
            "amountWei": amount_wei.to_string(),
        }))
    }

    async fn await_settlement(
        &self,
        transaction_id: &TransactionId,
        provider_response: &Value,
    ) -> Result<Settlement, PaymentError> {
        let tx_hash = provider_response
            .get("txHash")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::malformed(PaymentMethod::Crypto, "no txHash recorded"))?;

        match tokio::time::timeout(self.config.settlement_timeout, self.poll_receipt(tx_hash)).await {
            Ok(receipt) => {
                let payload = serde_json::to_value(&receipt)
                    .map_err(|e| PaymentError::malformed(PaymentMethod::Crypto, e.to_string()))?;
                let event = ProviderEvent::Crypto(CryptoSettlement {
                    transaction_id: transaction_id.clone(),
                    receipt,
                });
                Ok(Settlement::Settled(event.into_confirmation(payload)?))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    target: "ossy::payments::crypto",
                    transaction_id = %transaction_id,
                    tx_hash = tx_hash,
                    timeout_secs = self.config.settlement_timeout.as_secs(),
                    "No receipt within settlement window"
                );
                Ok(Settlement::TimedOut)
            }
        }
    }
}

/// Mined transaction receipt, as much of it as settlement needs.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    /// `0x1` success, `0x0` reverted. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
}

/// A receipt matched to the ledger row that paid for it.
#[derive(Debug, Clone)]
pub struct CryptoSettlement {
    pub transaction_id: TransactionId,
    pub receipt: TransactionReceipt,
}

impl CryptoSettlement {
    pub fn outcome(&self) -> ConfirmationOutcome {
        match self.receipt.status.as_deref() {
            Some("0x0") => ConfirmationOutcome::Failed {
                reason: "reverted".to_string(),
            },
            _ => ConfirmationOutcome::Paid,
        }
    }
}

/// Recipient address and amount in wei, read from `details`.
fn transfer_details(request: &IntentRequest) -> Result<(&str, u128), PaymentError> {
    let to = request
        .details
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::validation("details.to is required for crypto"))?;
    if !is_address(to) {
        return Err(PaymentError::validation(format!("details.to '{}' is not an address", to)));
    }
    let amount_wei = request
        .details
        .get("amountWei")
        .and_then(parse_wei)
        .ok_or_else(|| PaymentError::validation("details.amountWei must be a positive integer"))?;
    Ok((to, amount_wei))
}

fn is_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_wei(value: &Value) -> Option<u128> {
    let amount = match value {
        Value::String(s) => s.trim().parse::<u128>().ok()?,
        Value::Number(n) => u128::from(n.as_u64()?),
        _ => return None,
    };
    (amount > 0).then_some(amount)
}
