//! Payment-specific error types.
//!
//! Each variant is one entry of the service's failure taxonomy; conversion to
//! [`ApiError`] decides the HTTP status seen by clients and by providers
//! delivering webhooks.

use crate::error::ApiError;

use super::types::{PaymentMethod, TransactionStatus};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    /// Missing or malformed request fields.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The requested rail is unknown or not configured.
    #[error("Unsupported payment method: {method}")]
    UnsupportedMethod { method: String },

    /// Webhook authenticity could not be proven.
    #[error("Invalid {provider} signature: {reason}")]
    Authentication { provider: String, reason: String },

    #[error("Transaction not found: {transaction_id}")]
    NotFound { transaction_id: String },

    /// A terminal transaction was asked to move to the other terminal state.
    #[error("Transaction {transaction_id} is {from} and cannot become {to}")]
    InvalidTransition {
        transaction_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// The rail failed or rejected the request.
    ///
    /// `response` carries the provider's body when one was returned, so it can
    /// be recorded against the transaction.
    #[error("{method} provider error: {message}")]
    Provider {
        method: PaymentMethod,
        message: String,
        http_status: Option<u16>,
        response: Option<serde_json::Value>,
    },

    /// A webhook body did not contain the fields the provider mapping needs.
    #[error("Malformed {provider} payload: {message}")]
    MalformedPayload { provider: PaymentMethod, message: String },

    /// The external distributor could not be notified. Never surfaced to callers.
    #[error("Fulfillment notice failed: {message}")]
    FulfillmentNotice { message: String },

    /// The backing document store is unavailable or returned bad data.
    #[error("Ledger store error: {message}")]
    Store { message: String },

    /// Compare-and-save kept losing; the caller should retry.
    #[error("Concurrent modification of transaction {transaction_id}")]
    ConcurrentModification { transaction_id: String },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    pub fn malformed(provider: PaymentMethod, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            provider,
            message: message.into(),
        }
    }

    pub fn provider(method: PaymentMethod, message: impl Into<String>) -> Self {
        Self::Provider {
            method,
            message: message.into(),
            http_status: None,
            response: None,
        }
    }

    /// Errors caused by the caller's input rather than by this service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnsupportedMethod { .. }
                | Self::Authentication { .. }
                | Self::NotFound { .. }
                | Self::InvalidTransition { .. }
                | Self::MalformedPayload { .. }
        )
    }

    /// Errors worth retrying with the same input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { .. } | Self::ConcurrentModification { .. } => true,
            Self::Provider { http_status, .. } => {
                matches!(http_status, None | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for PaymentError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = err
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.as_ref()))
                    .collect();
                if messages.is_empty() {
                    format!("{}: invalid", field)
                } else {
                    format!("{}: {}", field, messages.join(", "))
                }
            })
            .collect();
        fields.sort();
        Self::validation(fields.join("; "))
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::Validation { .. }
            | PaymentError::UnsupportedMethod { .. }
            | PaymentError::Authentication { .. }
            | PaymentError::MalformedPayload { .. } => ApiError::BadRequest(err.to_string()),
            PaymentError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            PaymentError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            PaymentError::Provider { .. } => ApiError::ServiceUnavailable(err.to_string()),
            PaymentError::FulfillmentNotice { .. }
            | PaymentError::Store { .. }
            | PaymentError::ConcurrentModification { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PaymentError::InvalidTransition {
            transaction_id: "tx_1".to_string(),
            from: TransactionStatus::Failed,
            to: TransactionStatus::Paid,
        };
        assert_eq!(err.to_string(), "Transaction tx_1 is failed and cannot become paid");

        let err = PaymentError::UnsupportedMethod {
            method: "paypal".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported payment method: paypal");
    }

    #[test]
    fn test_error_classification() {
        let err = PaymentError::NotFound {
            transaction_id: "tx_1".to_string(),
        };
        assert!(err.is_client_error());
        assert!(!err.is_retryable());

        let err = PaymentError::store("unavailable");
        assert!(!err.is_client_error());
        assert!(err.is_retryable());

        let err = PaymentError::Provider {
            method: PaymentMethod::Xendit,
            message: "declined".to_string(),
            http_status: Some(400),
            response: None,
        };
        assert!(!err.is_retryable());

        let err = PaymentError::provider(PaymentMethod::Crypto, "connection reset");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_convert_to_api_error() {
        let api: ApiError = PaymentError::Authentication {
            provider: "xendit".to_string(),
            reason: "mismatch".to_string(),
        }
        .into();
        assert!(matches!(api, ApiError::BadRequest(_)));

        let api: ApiError = PaymentError::NotFound {
            transaction_id: "tx_9".to_string(),
        }
        .into();
        assert!(matches!(api, ApiError::NotFound(_)));

        let api: ApiError = PaymentError::InvalidTransition {
            transaction_id: "tx_9".to_string(),
            from: TransactionStatus::Failed,
            to: TransactionStatus::Paid,
        }
        .into();
        assert!(matches!(api, ApiError::Conflict(_)));

        let api: ApiError = PaymentError::store("down").into();
        assert!(matches!(api, ApiError::Internal(_)));
    }
}
