//! Ledger records and the identifiers that key them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PaymentError;

/// Opaque transaction identifier, always generated by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("tx_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an identifier read back from a provider payload or a URL.
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PaymentError::validation("transaction id must not be empty"));
        }
        if raw.len() > 128 || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(PaymentError::validation(format!("malformed transaction id '{}'", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment rail a transaction is settled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Fiat gateway A: hosted invoices, hex HMAC webhooks.
    Xendit,
    /// Fiat gateway B: source-based payments, base64 HMAC webhooks.
    Paymongo,
    /// On-chain transfer, settled synchronously by polling the node.
    Crypto,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [Self::Xendit, Self::Paymongo, Self::Crypto];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xendit => "xendit",
            Self::Paymongo => "paymongo",
            Self::Crypto => "crypto",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xendit" => Ok(Self::Xendit),
            "paymongo" => Ok(Self::Paymongo),
            "crypto" => Ok(Self::Crypto),
            _ => Err(PaymentError::UnsupportedMethod {
                method: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transaction.
///
/// `Pending` may move to exactly one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
}

impl TransactionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment intent and its lifecycle, as held by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: String,
    pub video_id: String,
    pub method: PaymentMethod,
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    /// Provider payload captured when the intent was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<serde_json::Value>,
    /// Provider payload captured when the payment was confirmed or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped on every write; used for compare-and-save.
    pub version: u64,
}

impl Transaction {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.status == TransactionStatus::Paid
    }
}

/// Fields supplied when opening a new ledger row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub method: PaymentMethod,
    pub user_id: String,
    pub video_id: String,
    pub amount: f64,
    pub currency: String,
    pub provider_response: Option<serde_json::Value>,
}

/// Authorization for a user to retrieve a video. Existence is the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub user_id: String,
    pub video_id: String,
    pub transaction_id: TransactionId,
    pub granted_at: DateTime<Utc>,
}
