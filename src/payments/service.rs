//! Intent creation and the read/reconcile operations behind the HTTP API.

use serde::Deserialize;
use serde_json::{Map, Value};
use validator::Validate;

use super::error::PaymentError;
use super::fulfillment::FulfillmentOrchestrator;
use super::rails::IntentRequest;
use super::types::{AccessGrant, NewTransaction, PaymentMethod, Transaction, TransactionId};

/// Body of `POST /payments/create-intent`.
///
/// Every field defaults so that a missing field is reported by validation
/// rather than by the JSON decoder.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateIntentRequest {
    #[validate(length(min = 1, message = "method is required"))]
    pub method: String,

    #[validate(range(exclusive_min = 0.0, message = "amount must be greater than zero"))]
    pub amount: f64,

    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,

    #[validate(email(message = "payerEmail must be a valid email address"))]
    pub payer_email: Option<String>,

    pub source_type: Option<String>,

    pub details: Option<Map<String, Value>>,

    #[validate(length(min = 1, max = 128, message = "videoId is required"))]
    pub video_id: String,

    #[validate(length(min = 1, max = 128, message = "userId is required"))]
    pub user_id: String,
}

impl CreateIntentRequest {
    /// Strip surrounding whitespace so blank identifiers fail validation.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for field in [&mut self.method, &mut self.currency, &mut self.video_id, &mut self.user_id] {
            *field = field.trim().to_string();
        }
        self.payer_email = self.payer_email.map(|email| email.trim().to_string());
        self.source_type = self.source_type.map(|source| source.trim().to_string());
        self
    }
}

/// A created intent: the ledger row plus the provider's raw response.
#[derive(Debug, Clone)]
pub struct CreatedIntent {
    pub transaction: Transaction,
    pub provider_response: Value,
}

#[derive(Clone)]
pub struct IntentService {
    orchestrator: FulfillmentOrchestrator,
}

impl IntentService {
    pub fn new(orchestrator: FulfillmentOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Validate, persist a `pending` row, then call the rail.
    ///
    /// Request and rail-specific validation both finish before the ledger is
    /// touched. The row exists before any provider call. A provider failure
    /// leaves it `failed` with the provider's body attached. Synchronous rails
    /// are then awaited for settlement; a settlement timeout leaves the row
    /// `pending`.
    pub async fn create_intent(&self, request: CreateIntentRequest) -> Result<CreatedIntent, PaymentError> {
        let request = request.normalized();
        request.validate()?;
        let method: PaymentMethod = request.method.parse()?;
        let rail = self.orchestrator.rails().get(method)?;
        let ledger = self.orchestrator.ledger();

        let intent = IntentRequest {
            transaction_id: TransactionId::generate(),
            amount: request.amount,
            currency: request.currency.to_ascii_uppercase(),
            payer_email: request.payer_email,
            source_type: request.source_type,
            details: request.details.unwrap_or_default(),
        };
        rail.validate_intent(&intent)?;

        let transaction = ledger
            .create(NewTransaction {
                id: intent.transaction_id.clone(),
                method,
                user_id: request.user_id,
                video_id: request.video_id,
                amount: intent.amount,
                currency: intent.currency.clone(),
                provider_response: None,
            })
            .await?;

        let provider_response = match rail.create_intent(&intent).await {
            Ok(response) => response,
            Err(err) => {
                self.record_failure(&transaction.id, &err).await;
                return Err(err);
            }
        };

        let transaction = ledger
            .record_provider_response(&transaction.id, provider_response.clone())
            .await?;

        tracing::info!(
            target: "ossy::payments::intents",
            transaction_id = %transaction.id,
            method = %method,
            "Payment intent created"
        );

        let transaction = match self.orchestrator.settle(transaction.clone()).await {
            Ok(settled) => settled,
            Err(e) => {
                tracing::error!(
                    target: "ossy::payments::intents",
                    transaction_id = %transaction.id,
                    error = %e,
                    "Settlement failed; transaction left pending for reconciliation"
                );
                transaction
            }
        };

        Ok(CreatedIntent {
            transaction,
            provider_response,
        })
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Transaction, PaymentError> {
        let id = TransactionId::parse(id)?;
        self.orchestrator.ledger().get(&id).await
    }

    /// Re-check a pending transaction with its rail.
    pub async fn reconcile(&self, id: &str) -> Result<Transaction, PaymentError> {
        let transaction = self.get_transaction(id).await?;
        self.orchestrator.settle(transaction).await
    }

    pub async fn access_grant(&self, user_id: &str, video_id: &str) -> Result<Option<AccessGrant>, PaymentError> {
        self.orchestrator
            .ledger()
            .store()
            .get_access_grant(user_id, video_id)
            .await
    }

    pub async fn access_grants(&self, user_id: &str) -> Result<Vec<AccessGrant>, PaymentError> {
        self.orchestrator.ledger().store().list_access_grants(user_id).await
    }

    pub fn orchestrator(&self) -> &FulfillmentOrchestrator {
        &self.orchestrator
    }

    async fn record_failure(&self, id: &TransactionId, err: &PaymentError) {
        let ledger = self.orchestrator.ledger();
        if let PaymentError::Provider { response: Some(response), .. } = err {
            if let Err(e) = ledger.record_provider_response(id, response.clone()).await {
                tracing::error!(
                    target: "ossy::payments::intents",
                    transaction_id = %id,
                    error = %e,
                    "Failed to record provider rejection"
                );
            }
        }
        if let Err(e) = ledger.mark_failed(id, err.to_string(), None).await {
            tracing::error!(
                target: "ossy::payments::intents",
                transaction_id = %id,
                error = %e,
                "Failed to mark transaction failed after provider error"
            );
        }
        tracing::warn!(
            target: "ossy::payments::intents",
            transaction_id = %id,
            error = %err,
            "Payment intent rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::distribution::NoopDistributor;
    use crate::payments::ledger::TransactionLedger;
    use crate::payments::rails::{PaymentRail, RailRegistry, Settlement};
    use crate::payments::store::{InMemoryLedgerStore, LedgerStore};
    use crate::payments::types::TransactionStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Rail that echoes the transaction id, or rejects when told to.
    struct EchoRail {
        method: PaymentMethod,
        reject: bool,
        settle_paid: bool,
    }

    #[async_trait]
    impl PaymentRail for EchoRail {
        fn method(&self) -> PaymentMethod {
            self.method
        }

        async fn create_intent(&self, request: &IntentRequest) -> Result<Value, PaymentError> {
            if self.reject {
                return Err(PaymentError::Provider {
                    method: self.method,
                    message: "declined".to_string(),
                    http_status: Some(400),
                    response: Some(json!({"message": "declined", "error": true})),
                });
            }
            Ok(json!({"reference": request.transaction_id, "details": request.details}))
        }

        async fn await_settlement(&self, id: &TransactionId, response: &Value) -> Result<Settlement, PaymentError> {
            if !self.settle_paid {
                return Ok(Settlement::Deferred);
            }
            Ok(Settlement::Settled(crate::payments::rails::Confirmation {
                method: self.method,
                transaction_id: id.clone(),
                outcome: crate::payments::rails::ConfirmationOutcome::Paid,
                payload: response.clone(),
            }))
        }
    }

    fn service(rails: Vec<EchoRail>) -> (IntentService, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        let mut registry = RailRegistry::new();
        for rail in rails {
            registry.register(Arc::new(rail));
        }
        let orchestrator = FulfillmentOrchestrator::new(
            TransactionLedger::new(Arc::new(store.clone())),
            registry,
            Arc::new(NoopDistributor),
            Duration::from_secs(1),
        );
        (IntentService::new(orchestrator), store)
    }

    fn xendit(reject: bool) -> EchoRail {
        EchoRail {
            method: PaymentMethod::Xendit,
            reject,
            settle_paid: false,
        }
    }

    fn request(method: &str) -> CreateIntentRequest {
        CreateIntentRequest {
            method: method.to_string(),
            amount: 500.0,
            currency: "php".to_string(),
            payer_email: Some("buyer@example.com".to_string()),
            video_id: "v1".to_string(),
            user_id: "u1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_intent_records_pending() {
        let (service, store) = service(vec![xendit(false)]);
        let created = service.create_intent(request("xendit")).await.unwrap();

        assert_eq!(created.transaction.status, TransactionStatus::Pending);
        assert_eq!(created.transaction.currency, "PHP");
        assert_eq!(created.provider_response["reference"], created.transaction.id.as_str());

        let stored = store.get_transaction(&created.transaction.id).await.unwrap().unwrap();
        assert_eq!(stored.provider_response, Some(created.provider_response));
    }

    #[tokio::test]
    async fn test_validation_happens_before_ledger() {
        let (service, store) = service(vec![xendit(false)]);
        let mut req = request("xendit");
        req.amount = 0.0;
        req.user_id = String::new();
        let err = service.create_intent(req).await.unwrap_err();
        match err {
            PaymentError::Validation { message } => {
                assert!(message.contains("amount"));
                assert!(message.contains("user_id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_identifiers_are_rejected() {
        let (service, store) = service(vec![xendit(false)]);
        let mut req = request("xendit");
        req.user_id = "   ".to_string();
        req.video_id = "\t".to_string();
        let err = service.create_intent(req).await.unwrap_err();
        match err {
            PaymentError::Validation { message } => {
                assert!(message.contains("userId is required"), "{message}");
                assert!(message.contains("videoId is required"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_identifiers_are_stored_trimmed() {
        let (service, _store) = service(vec![xendit(false)]);
        let mut req = request(" xendit ");
        req.user_id = "  u1 ".to_string();
        req.video_id = "v1\n".to_string();
        let created = service.create_intent(req).await.unwrap();
        assert_eq!(created.transaction.user_id, "u1");
        assert_eq!(created.transaction.video_id, "v1");
    }

    #[tokio::test]
    async fn test_rail_validation_happens_before_ledger() {
        let store = InMemoryLedgerStore::new();
        let rail = crate::payments::rails::XenditRail::new(
            crate::payments::rails::XenditConfig::new("xnd_test").unwrap(),
        )
        .unwrap();
        let orchestrator = FulfillmentOrchestrator::new(
            TransactionLedger::new(Arc::new(store.clone())),
            RailRegistry::new().with_rail(Arc::new(rail)),
            Arc::new(NoopDistributor),
            Duration::from_secs(1),
        );
        let service = IntentService::new(orchestrator);

        let mut req = request("xendit");
        req.payer_email = None;
        let err = service.create_intent(req).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation { .. }));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_method_creates_no_row() {
        let (service, store) = service(vec![xendit(false)]);
        let err = service.create_intent(request("paypal")).await.unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedMethod { .. }));

        // Known method, but not configured.
        let err = service.create_intent(request("paymongo")).await.unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedMethod { .. }));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_rejection_marks_failed() {
        let (service, store) = service(vec![xendit(true)]);
        let err = service.create_intent(request("xendit")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Provider { .. }));

        let rows = store.list_pending(None).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_synchronous_rail_settles_and_grants() {
        let (service, store) = service(vec![EchoRail {
            method: PaymentMethod::Crypto,
            reject: false,
            settle_paid: true,
        }]);
        let mut req = request("crypto");
        req.details = Some(serde_json::from_value(json!({"to": "0xabc"})).unwrap());

        let created = service.create_intent(req).await.unwrap();
        assert_eq!(created.transaction.status, TransactionStatus::Paid);
        assert!(store.get_access_grant("u1", "v1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_and_reconcile() {
        let (service, _store) = service(vec![xendit(false)]);
        let created = service.create_intent(request("xendit")).await.unwrap();
        let id = created.transaction.id.as_str();

        assert_eq!(service.get_transaction(id).await.unwrap().id, created.transaction.id);
        assert!(service.reconcile(id).await.unwrap().is_pending());

        let err = service.get_transaction("tx_unknown").await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound { .. }));
        let err = service.get_transaction("bad id!").await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation { .. }));
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let req: CreateIntentRequest = serde_json::from_value(json!({
            "method": "paymongo",
            "amount": 250,
            "currency": "PHP",
            "sourceType": "gcash",
            "details": {"id": "src_1"},
            "videoId": "v9",
            "userId": "u9"
        }))
        .unwrap();
        assert_eq!(req.source_type.as_deref(), Some("gcash"));
        assert_eq!(req.video_id, "v9");
        assert!(req.validate().is_ok());
    }
}
