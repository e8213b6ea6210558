//! Storage trait for ledger data.
//!
//! Implement [`LedgerStore`] to persist transactions and access grants to a
//! document store. [`InMemoryLedgerStore`] backs tests and single-node runs.

use async_trait::async_trait;

use super::error::PaymentError;
use super::types::{AccessGrant, PaymentMethod, Transaction, TransactionId};

pub type StoreResult<T> = std::result::Result<T, PaymentError>;

/// Persistence for transactions and access grants.
///
/// Writes to a transaction go through [`compare_and_save_transaction`], so two
/// concurrent confirmations for the same id cannot both apply.
///
/// [`compare_and_save_transaction`]: LedgerStore::compare_and_save_transaction
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new transaction. Fails if the id already exists.
    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()>;

    async fn get_transaction(&self, id: &TransactionId) -> StoreResult<Option<Transaction>>;

    /// Save `tx` only if the stored row is still at `expected_version`.
    ///
    /// Returns `Ok(false)` when another writer got there first. The caller is
    /// responsible for bumping `tx.version`.
    ///
    /// Implementations must make the check and the write atomic, e.g. a
    /// conditional update keyed on the version field or a store transaction.
    async fn compare_and_save_transaction(
        &self,
        tx: &Transaction,
        expected_version: u64,
    ) -> StoreResult<bool>;

    /// Create the grant for `(user_id, video_id)` unless one exists.
    ///
    /// Returns `Ok(true)` when the grant was created and `Ok(false)` when one
    /// was already present. The existing grant is never overwritten.
    async fn put_access_grant(&self, grant: &AccessGrant) -> StoreResult<bool>;

    async fn get_access_grant(&self, user_id: &str, video_id: &str) -> StoreResult<Option<AccessGrant>>;

    /// Every grant a user holds, oldest first.
    async fn list_access_grants(&self, user_id: &str) -> StoreResult<Vec<AccessGrant>>;

    /// Pending transactions, optionally restricted to one rail, oldest first.
    async fn list_pending(&self, method: Option<PaymentMethod>) -> StoreResult<Vec<Transaction>>;

    /// Liveness check used by the health endpoint.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// In-memory ledger store.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    /// In-memory ledger store.
    ///
    /// Wraps data in Arc for cheap cloning. Contents are lost on restart.
    #[derive(Default, Clone)]
    pub struct InMemoryLedgerStore {
        inner: Arc<InMemoryLedgerStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryLedgerStoreInner {
        transactions: RwLock<HashMap<TransactionId, Transaction>>,
        grants: RwLock<HashMap<(String, String), AccessGrant>>,
    }

    fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
        lock.read().map_err(|_| PaymentError::store("ledger lock poisoned"))
    }

    fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
        lock.write().map_err(|_| PaymentError::store("ledger lock poisoned"))
    }

    impl InMemoryLedgerStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of stored transactions (for testing).
        pub fn transaction_count(&self) -> usize {
            self.inner.transactions.read().map(|t| t.len()).unwrap_or(0)
        }

        /// Number of stored grants (for testing).
        pub fn grant_count(&self) -> usize {
            self.inner.grants.read().map(|g| g.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl LedgerStore for InMemoryLedgerStore {
        async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()> {
            let mut transactions = write(&self.inner.transactions)?;
            if transactions.contains_key(&tx.id) {
                return Err(PaymentError::store(format!("transaction {} already exists", tx.id)));
            }
            transactions.insert(tx.id.clone(), tx.clone());
            Ok(())
        }

        async fn get_transaction(&self, id: &TransactionId) -> StoreResult<Option<Transaction>> {
            Ok(read(&self.inner.transactions)?.get(id).cloned())
        }

        async fn compare_and_save_transaction(
            &self,
            tx: &Transaction,
            expected_version: u64,
        ) -> StoreResult<bool> {
            let mut transactions = write(&self.inner.transactions)?;
            match transactions.get(&tx.id) {
                Some(current) if current.version == expected_version => {
                    transactions.insert(tx.id.clone(), tx.clone());
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Err(PaymentError::NotFound {
                    transaction_id: tx.id.to_string(),
                }),
            }
        }

        async fn put_access_grant(&self, grant: &AccessGrant) -> StoreResult<bool> {
            let mut grants = write(&self.inner.grants)?;
            let key = (grant.user_id.clone(), grant.video_id.clone());
            if grants.contains_key(&key) {
                return Ok(false);
            }
            grants.insert(key, grant.clone());
            Ok(true)
        }

        async fn get_access_grant(&self, user_id: &str, video_id: &str) -> StoreResult<Option<AccessGrant>> {
            let grants = read(&self.inner.grants)?;
            Ok(grants.get(&(user_id.to_string(), video_id.to_string())).cloned())
        }

        async fn list_access_grants(&self, user_id: &str) -> StoreResult<Vec<AccessGrant>> {
            let grants = read(&self.inner.grants)?;
            let mut list: Vec<AccessGrant> = grants
                .values()
                .filter(|g| g.user_id == user_id)
                .cloned()
                .collect();
            list.sort_by_key(|g| g.granted_at);
            Ok(list)
        }

        async fn list_pending(&self, method: Option<PaymentMethod>) -> StoreResult<Vec<Transaction>> {
            let transactions = read(&self.inner.transactions)?;
            let mut list: Vec<Transaction> = transactions
                .values()
                .filter(|tx| tx.is_pending())
                .filter(|tx| method.is_none_or(|m| tx.method == m))
                .cloned()
                .collect();
            list.sort_by_key(|tx| tx.created_at);
            Ok(list)
        }
    }

}

pub use memory::InMemoryLedgerStore;
