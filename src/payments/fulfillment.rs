//! Fulfillment orchestration.
//!
//! Turns a verified provider confirmation into ledger state and an access
//! grant. Each step is idempotent, so a re-delivered confirmation repairs
//! whatever a crashed earlier attempt left undone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::distribution::{AccessNotice, ContentDistributor};
use super::error::PaymentError;
use super::ledger::TransactionLedger;
use super::rails::{Confirmation, ConfirmationOutcome, RailRegistry, Settlement};
use super::types::{AccessGrant, PaymentMethod, Transaction, TransactionId};

/// What a confirmation did.
#[derive(Debug)]
pub enum FulfillmentOutcome {
    Fulfilled {
        transaction: Transaction,
        /// `false` when the row was already `paid` (replay).
        newly_paid: bool,
        /// `false` when the grant already existed.
        grant_created: bool,
        /// Background distributor notice. Never awaited by request handlers.
        notice: JoinHandle<()>,
    },
    Failed {
        transaction: Transaction,
    },
    Ignored {
        transaction_id: TransactionId,
        event_type: String,
    },
}

impl FulfillmentOutcome {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            Self::Fulfilled { transaction, .. } | Self::Failed { transaction } => &transaction.id,
            Self::Ignored { transaction_id, .. } => transaction_id,
        }
    }
}

/// The only writer of [`AccessGrant`]s.
#[derive(Clone)]
pub struct FulfillmentOrchestrator {
    ledger: TransactionLedger,
    rails: RailRegistry,
    distributor: Arc<dyn ContentDistributor>,
    notice_timeout: Duration,
}

impl FulfillmentOrchestrator {
    pub fn new(
        ledger: TransactionLedger,
        rails: RailRegistry,
        distributor: Arc<dyn ContentDistributor>,
        notice_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            rails,
            distributor,
            notice_timeout,
        }
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn rails(&self) -> &RailRegistry {
        &self.rails
    }

    /// Handle an already-authenticated webhook body from `method`'s provider.
    pub async fn handle_webhook(&self, method: PaymentMethod, raw_body: &[u8]) -> Result<FulfillmentOutcome, PaymentError> {
        let rail = self.rails.get(method)?;
        let confirmation = rail.parse_confirmation(raw_body)?;
        self.apply(confirmation).await
    }

    /// Apply a confirmation to the ledger.
    pub async fn apply(&self, confirmation: Confirmation) -> Result<FulfillmentOutcome, PaymentError> {
        let Confirmation {
            method,
            transaction_id,
            outcome,
            payload,
        } = confirmation;

        if !matches!(outcome, ConfirmationOutcome::Ignored { .. }) {
            self.ensure_owned_by(method, &transaction_id).await?;
        }

        match outcome {
            ConfirmationOutcome::Paid => self.fulfill(&transaction_id, payload).await,
            ConfirmationOutcome::Failed { reason } => {
                let settled = self
                    .ledger
                    .mark_failed(&transaction_id, reason.clone(), Some(payload))
                    .await?;
                tracing::info!(
                    target: "ossy::payments::fulfillment",
                    transaction_id = %transaction_id,
                    provider = %method,
                    reason = %reason,
                    applied = settled.was_applied(),
                    "Payment failed"
                );
                Ok(FulfillmentOutcome::Failed {
                    transaction: settled.transaction,
                })
            }
            ConfirmationOutcome::Ignored { event_type } => {
                tracing::debug!(
                    target: "ossy::payments::fulfillment",
                    transaction_id = %transaction_id,
                    provider = %method,
                    event_type = %event_type,
                    "Ignoring non-settling event"
                );
                Ok(FulfillmentOutcome::Ignored {
                    transaction_id,
                    event_type,
                })
            }
        }
    }

    /// A confirmation may only settle a transaction created on the same rail.
    async fn ensure_owned_by(&self, method: PaymentMethod, transaction_id: &TransactionId) -> Result<(), PaymentError> {
        let transaction = self.ledger.get(transaction_id).await?;
        if transaction.method == method {
            return Ok(());
        }
        tracing::warn!(
            target: "ossy::payments::fulfillment",
            transaction_id = %transaction_id,
            provider = %method,
            owner = %transaction.method,
            "Confirmation from a rail that does not own the transaction"
        );
        Err(PaymentError::malformed(
            method,
            format!("transaction {} belongs to the {} rail", transaction_id, transaction.method),
        ))
    }

    /// Mark paid, grant access, notify the distributor.
    ///
    /// Steps one and two are re-run on replays; only their failures are
    /// returned. The notice runs detached under `notice_timeout`.
    pub async fn fulfill(&self, transaction_id: &TransactionId, payload: Value) -> Result<FulfillmentOutcome, PaymentError> {
        let settled = self.ledger.mark_paid(transaction_id, payload).await?;
        let newly_paid = settled.was_applied();
        let transaction = settled.transaction;

        let grant = AccessGrant {
            user_id: transaction.user_id.clone(),
            video_id: transaction.video_id.clone(),
            transaction_id: transaction.id.clone(),
            granted_at: Utc::now(),
        };
        let grant_created = self.ledger.store().put_access_grant(&grant).await?;

        tracing::info!(
            target: "ossy::payments::fulfillment",
            transaction_id = %transaction.id,
            provider = %transaction.method,
            user_id = %transaction.user_id,
            video_id = %transaction.video_id,
            newly_paid,
            grant_created,
            "Payment fulfilled"
        );

        let notice = self.spawn_notice(AccessNotice {
            user_id: transaction.user_id.clone(),
            video_id: transaction.video_id.clone(),
        });

        Ok(FulfillmentOutcome::Fulfilled {
            transaction,
            newly_paid,
            grant_created,
            notice,
        })
    }

    /// Wait for a synchronous rail to settle `transaction` and apply the result.
    ///
    /// Returns the transaction as it stands afterwards. Terminal rows, rows
    /// without a recorded provider response, and rails that settle through
    /// webhooks come back unchanged; a timeout leaves the row `pending`.
    pub async fn settle(&self, transaction: Transaction) -> Result<Transaction, PaymentError> {
        if transaction.status.is_terminal() {
            return Ok(transaction);
        }
        let Some(provider_response) = transaction.provider_response.as_ref() else {
            tracing::warn!(
                target: "ossy::payments::fulfillment",
                transaction_id = %transaction.id,
                "Pending transaction has no provider response to settle from"
            );
            return Ok(transaction);
        };

        let rail = self.rails.get(transaction.method)?;
        match rail.await_settlement(&transaction.id, provider_response).await? {
            Settlement::Settled(confirmation) => match self.apply(confirmation).await? {
                FulfillmentOutcome::Fulfilled { transaction, .. }
                | FulfillmentOutcome::Failed { transaction } => Ok(transaction),
                FulfillmentOutcome::Ignored { .. } => Ok(transaction),
            },
            Settlement::Deferred | Settlement::TimedOut => Ok(transaction),
        }
    }

    fn spawn_notice(&self, notice: AccessNotice) -> JoinHandle<()> {
        let distributor = self.distributor.clone();
        let timeout = self.notice_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, distributor.grant_access(&notice)).await {
                Ok(Ok(())) => tracing::debug!(
                    target: "ossy::payments::fulfillment",
                    distributor = distributor.name(),
                    user_id = %notice.user_id,
                    video_id = %notice.video_id,
                    "Fulfillment notice delivered"
                ),
                Ok(Err(e)) => tracing::warn!(
                    target: "ossy::payments::fulfillment",
                    distributor = distributor.name(),
                    user_id = %notice.user_id,
                    video_id = %notice.video_id,
                    error = %e,
                    "Fulfillment notice failed"
                ),
                Err(_elapsed) => tracing::warn!(
                    target: "ossy::payments::fulfillment",
                    distributor = distributor.name(),
                    user_id = %notice.user_id,
                    video_id = %notice.video_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Fulfillment notice timed out"
                ),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::rails::{IntentRequest, PaymentRail, XenditConfig, XenditRail};
    use crate::payments::store::{InMemoryLedgerStore, LedgerStore};
    use crate::payments::types::{NewTransaction, TransactionStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingDistributor {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ContentDistributor for RecordingDistributor {
        async fn grant_access(&self, _notice: &AccessNotice) -> Result<(), PaymentError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PaymentError::FulfillmentNotice {
                    message: "down".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn revoke_access(&self, _notice: &AccessNotice) -> Result<(), PaymentError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    /// Crypto stand-in that settles with a fixed outcome.
    struct SettlingRail {
        outcome: Mutex<Option<Settlement>>,
    }

    #[async_trait]
    impl PaymentRail for SettlingRail {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Crypto
        }

        async fn create_intent(&self, _request: &IntentRequest) -> Result<Value, PaymentError> {
            Ok(json!({"txHash": "0x1"}))
        }

        async fn await_settlement(&self, _id: &TransactionId, _response: &Value) -> Result<Settlement, PaymentError> {
            Ok(self.outcome.lock().unwrap().take().unwrap_or(Settlement::TimedOut))
        }
    }

    fn orchestrator(distributor: Arc<RecordingDistributor>) -> (FulfillmentOrchestrator, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        let ledger = TransactionLedger::new(Arc::new(store.clone()));
        let rails = RailRegistry::new().with_rail(Arc::new(
            XenditRail::new(XenditConfig::new("xnd_test").unwrap()).unwrap(),
        ));
        (
            FulfillmentOrchestrator::new(ledger, rails, distributor, Duration::from_millis(200)),
            store,
        )
    }

    async fn pending(orchestrator: &FulfillmentOrchestrator, method: PaymentMethod) -> Transaction {
        orchestrator
            .ledger()
            .create(NewTransaction {
                id: TransactionId::generate(),
                method,
                user_id: "u1".to_string(),
                video_id: "v1".to_string(),
                amount: 500.0,
                currency: "PHP".to_string(),
                provider_response: Some(json!({"txHash": "0x1"})),
            })
            .await
            .unwrap()
    }

    fn paid_webhook(tx: &Transaction) -> Vec<u8> {
        serde_json::to_vec(&json!({"external_id": tx.id, "status": "PAID"})).unwrap()
    }

    #[tokio::test]
    async fn test_paid_webhook_grants_access() {
        let distributor = Arc::new(RecordingDistributor::default());
        let (orchestrator, store) = orchestrator(distributor.clone());
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;

        let outcome = orchestrator
            .handle_webhook(PaymentMethod::Xendit, &paid_webhook(&tx))
            .await
            .unwrap();
        match outcome {
            FulfillmentOutcome::Fulfilled { transaction, newly_paid, grant_created, notice } => {
                assert_eq!(transaction.status, TransactionStatus::Paid);
                assert!(newly_paid);
                assert!(grant_created);
                notice.await.unwrap();
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.get_access_grant("u1", "v1").await.unwrap().is_some());
        assert_eq!(distributor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let distributor = Arc::new(RecordingDistributor::default());
        let (orchestrator, store) = orchestrator(distributor);
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;
        let body = paid_webhook(&tx);

        orchestrator.handle_webhook(PaymentMethod::Xendit, &body).await.unwrap();
        let replay = orchestrator.handle_webhook(PaymentMethod::Xendit, &body).await.unwrap();
        match replay {
            FulfillmentOutcome::Fulfilled { newly_paid, grant_created, .. } => {
                assert!(!newly_paid);
                assert!(!grant_created);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.grant_count(), 1);
    }

    #[tokio::test]
    async fn test_replay_repairs_missing_grant() {
        let (orchestrator, store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;
        // Ledger updated but the grant was never written.
        orchestrator.ledger().mark_paid(&tx.id, json!({})).await.unwrap();
        assert_eq!(store.grant_count(), 0);

        orchestrator
            .handle_webhook(PaymentMethod::Xendit, &paid_webhook(&tx))
            .await
            .unwrap();
        assert_eq!(store.grant_count(), 1);
    }

    #[tokio::test]
    async fn test_notice_failure_is_swallowed() {
        let distributor = Arc::new(RecordingDistributor {
            fail: true,
            ..Default::default()
        });
        let (orchestrator, store) = orchestrator(distributor);
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;

        let outcome = orchestrator
            .handle_webhook(PaymentMethod::Xendit, &paid_webhook(&tx))
            .await
            .unwrap();
        if let FulfillmentOutcome::Fulfilled { notice, .. } = outcome {
            notice.await.unwrap();
        }
        assert_eq!(store.grant_count(), 1);
        assert!(orchestrator.ledger().get(&tx.id).await.unwrap().is_paid());
    }

    #[tokio::test]
    async fn test_notice_is_bounded_by_timeout() {
        let distributor = Arc::new(RecordingDistributor {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let (orchestrator, _store) = orchestrator(distributor.clone());
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;

        let outcome = orchestrator
            .handle_webhook(PaymentMethod::Xendit, &paid_webhook(&tx))
            .await
            .unwrap();
        if let FulfillmentOutcome::Fulfilled { notice, .. } = outcome {
            tokio::time::timeout(Duration::from_secs(5), notice)
                .await
                .expect("notice task should finish at its own timeout")
                .unwrap();
        }
        assert_eq!(distributor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_then_paid_is_invalid_transition() {
        let (orchestrator, store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;

        let expired = serde_json::to_vec(&json!({"external_id": tx.id, "status": "EXPIRED"})).unwrap();
        let outcome = orchestrator.handle_webhook(PaymentMethod::Xendit, &expired).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::Failed { .. }));

        let err = orchestrator
            .handle_webhook(PaymentMethod::Xendit, &paid_webhook(&tx))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));
        assert_eq!(store.grant_count(), 0);
    }

    #[tokio::test]
    async fn test_ignored_event_leaves_ledger_alone() {
        let (orchestrator, _store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;
        let body = serde_json::to_vec(&json!({"external_id": tx.id, "status": "PENDING"})).unwrap();

        let outcome = orchestrator.handle_webhook(PaymentMethod::Xendit, &body).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::Ignored { .. }));
        assert_eq!(outcome.transaction_id(), &tx.id);
        assert!(orchestrator.ledger().get(&tx.id).await.unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let (orchestrator, _store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let body = br#"{"external_id":"tx_missing","status":"PAID"}"#;
        let err = orchestrator.handle_webhook(PaymentMethod::Xendit, body).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_confirmation_from_other_rail_is_rejected() {
        let (orchestrator, store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Crypto).await;

        let err = orchestrator
            .handle_webhook(PaymentMethod::Xendit, &paid_webhook(&tx))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::MalformedPayload { provider: PaymentMethod::Xendit, .. }));

        let expired = serde_json::to_vec(&json!({"external_id": tx.id, "status": "EXPIRED"})).unwrap();
        let err = orchestrator
            .handle_webhook(PaymentMethod::Xendit, &expired)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::MalformedPayload { .. }));

        assert!(orchestrator.ledger().get(&tx.id).await.unwrap().is_pending());
        assert_eq!(store.grant_count(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_rail() {
        let (orchestrator, _store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let err = orchestrator
            .handle_webhook(PaymentMethod::Paymongo, b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedMethod { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_grant_once() {
        let (orchestrator, store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;
        let body = paid_webhook(&tx);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                let body = body.clone();
                tokio::spawn(async move { orchestrator.handle_webhook(PaymentMethod::Xendit, &body).await })
            })
            .collect();

        let mut newly_paid = 0;
        let mut created = 0;
        for handle in handles {
            if let FulfillmentOutcome::Fulfilled { newly_paid: n, grant_created: g, .. } = handle.await.unwrap().unwrap() {
                newly_paid += usize::from(n);
                created += usize::from(g);
            }
        }
        assert_eq!(newly_paid, 1);
        assert_eq!(created, 1);
        assert_eq!(store.grant_count(), 1);
    }

    // ============ settle tests ============

    fn with_settling_rail(orchestrator: FulfillmentOrchestrator, settlement: Settlement) -> FulfillmentOrchestrator {
        let rails = orchestrator.rails.clone().with_rail(Arc::new(SettlingRail {
            outcome: Mutex::new(Some(settlement)),
        }));
        FulfillmentOrchestrator { rails, ..orchestrator }
    }

    #[tokio::test]
    async fn test_settle_confirmed_crypto_grants() {
        let (orchestrator, store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Crypto).await;
        let orchestrator = with_settling_rail(
            orchestrator,
            Settlement::Settled(Confirmation {
                method: PaymentMethod::Crypto,
                transaction_id: tx.id.clone(),
                outcome: ConfirmationOutcome::Paid,
                payload: json!({"status": "0x1"}),
            }),
        );

        let settled = orchestrator.settle(tx).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Paid);
        assert_eq!(store.grant_count(), 1);
    }

    #[tokio::test]
    async fn test_settle_timeout_stays_pending() {
        let (orchestrator, store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Crypto).await;
        let orchestrator = with_settling_rail(orchestrator, Settlement::TimedOut);

        let settled = orchestrator.settle(tx.clone()).await.unwrap();
        assert!(settled.is_pending());
        assert!(orchestrator.ledger().get(&tx.id).await.unwrap().is_pending());
        assert_eq!(store.grant_count(), 0);
    }

    #[tokio::test]
    async fn test_settle_fiat_is_deferred() {
        let (orchestrator, _store) = orchestrator(Arc::new(RecordingDistributor::default()));
        let tx = pending(&orchestrator, PaymentMethod::Xendit).await;
        let settled = orchestrator.settle(tx).await.unwrap();
        assert!(settled.is_pending());
    }
}
