//! Transaction ledger.
//!
//! The ledger is the only component allowed to create or transition a
//! [`Transaction`]. Every transition is a read-modify-write guarded by the
//! row's `version`, so racing callers on the same id resolve to exactly one
//! applied transition; the losers observe the idempotent no-op path.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::error::PaymentError;
use super::store::LedgerStore;
use super::types::{NewTransaction, PaymentMethod, Transaction, TransactionId, TransactionStatus};

/// Maximum number of retries for optimistic locking conflicts.
const MAX_RETRIES: u32 = 5;

/// Whether a transition request changed the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row moved out of `pending` on this call.
    Applied,
    /// The row was already in the requested state; nothing was written.
    AlreadyApplied,
}

/// Result of `mark_paid` / `mark_failed`: the post-transition record.
#[derive(Debug, Clone)]
pub struct Settled {
    pub transaction: Transaction,
    pub outcome: TransitionOutcome,
}

impl Settled {
    #[must_use]
    pub fn was_applied(&self) -> bool {
        self.outcome == TransitionOutcome::Applied
    }
}

#[derive(Clone)]
pub struct TransactionLedger {
    store: Arc<dyn LedgerStore>,
}

impl TransactionLedger {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Backing store, for read paths that bypass the ledger (access grants).
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Open a new `pending` row.
    pub async fn create(&self, new: NewTransaction) -> Result<Transaction, PaymentError> {
        let tx = Transaction {
            id: new.id,
            user_id: new.user_id,
            video_id: new.video_id,
            method: new.method,
            amount: new.amount,
            currency: new.currency,
            status: TransactionStatus::Pending,
            provider_response: new.provider_response,
            provider_payload: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
            version: 1,
        };

        self.store.insert_transaction(&tx).await?;

        tracing::info!(
            target: "ossy::payments::ledger",
            transaction_id = %tx.id,
            method = %tx.method,
            user_id = %tx.user_id,
            video_id = %tx.video_id,
            amount = tx.amount,
            currency = %tx.currency,
            "Transaction created"
        );

        Ok(tx)
    }

    pub async fn get(&self, id: &TransactionId) -> Result<Transaction, PaymentError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                transaction_id: id.to_string(),
            })
    }

    /// Attach the provider's creation-time payload to a row.
    ///
    /// Status is left untouched; a webhook may already have settled the row.
    pub async fn record_provider_response(
        &self,
        id: &TransactionId,
        response: Value,
    ) -> Result<Transaction, PaymentError> {
        for _attempt in 0..MAX_RETRIES {
            let current = self.get(id).await?;
            let mut next = current.clone();
            next.provider_response = Some(response.clone());
            next.version = current.version + 1;

            if self.store.compare_and_save_transaction(&next, current.version).await? {
                return Ok(next);
            }
        }

        Err(PaymentError::ConcurrentModification {
            transaction_id: id.to_string(),
        })
    }

    /// Move a row to `paid`.
    ///
    /// Already `paid` returns the stored record with
    /// [`TransitionOutcome::AlreadyApplied`]; `failed` is an
    /// [`InvalidTransition`](PaymentError::InvalidTransition).
    pub async fn mark_paid(&self, id: &TransactionId, provider_payload: Value) -> Result<Settled, PaymentError> {
        self.transition(id, TransactionStatus::Paid, |tx| {
            tx.provider_payload = Some(provider_payload.clone());
        })
        .await
    }

    /// Move a row to `failed`, the mirror image of [`mark_paid`](Self::mark_paid).
    pub async fn mark_failed(
        &self,
        id: &TransactionId,
        reason: impl Into<String>,
        provider_payload: Option<Value>,
    ) -> Result<Settled, PaymentError> {
        let reason = reason.into();
        self.transition(id, TransactionStatus::Failed, |tx| {
            tx.failure_reason = Some(reason.clone());
            if provider_payload.is_some() {
                tx.provider_payload = provider_payload.clone();
            }
        })
        .await
    }

    pub async fn list_pending(&self, method: Option<PaymentMethod>) -> Result<Vec<Transaction>, PaymentError> {
        self.store.list_pending(method).await
    }

    async fn transition<F>(
        &self,
        id: &TransactionId,
        target: TransactionStatus,
        apply: F,
    ) -> Result<Settled, PaymentError>
    where
        F: Fn(&mut Transaction),
    {
        for attempt in 0..MAX_RETRIES {
            let current = self.get(id).await?;

            if current.status == target {
                tracing::debug!(
                    target: "ossy::payments::ledger",
                    transaction_id = %id,
                    status = %target,
                    "Transition already applied"
                );
                return Ok(Settled {
                    transaction: current,
                    outcome: TransitionOutcome::AlreadyApplied,
                });
            }

            if current.status.is_terminal() {
                tracing::warn!(
                    target: "ossy::payments::ledger",
                    transaction_id = %id,
                    from = %current.status,
                    to = %target,
                    "Rejected transition out of terminal state"
                );
                return Err(PaymentError::InvalidTransition {
                    transaction_id: id.to_string(),
                    from: current.status,
                    to: target,
                });
            }

            let mut next = current.clone();
            apply(&mut next);
            next.status = target;
            next.completed_at = Some(Utc::now());
            next.version = current.version + 1;

            if self.store.compare_and_save_transaction(&next, current.version).await? {
                tracing::info!(
                    target: "ossy::payments::ledger",
                    transaction_id = %id,
                    method = %next.method,
                    status = %target,
                    "Transaction settled"
                );
                return Ok(Settled {
                    transaction: next,
                    outcome: TransitionOutcome::Applied,
                });
            }

            tracing::debug!(
                target: "ossy::payments::ledger",
                transaction_id = %id,
                attempt = attempt + 1,
                "Version conflict, re-reading transaction"
            );
        }

        tracing::error!(
            target: "ossy::payments::ledger",
            transaction_id = %id,
            "Transition abandoned after repeated version conflicts"
        );
        Err(PaymentError::ConcurrentModification {
            transaction_id: id.to_string(),
        })
    }
}
