use log::{debug, warn};
use thiserror::Error;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::crypto::Sha256Hash;
use super::transaction::{Transaction, TransactionError};

/// Errors that can occur when adding to the pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Coinbase transactions are never pooled")]
    CoinbaseNotAllowed,
}

/// Unconfirmed, individually valid transactions keyed by hash
///
/// Every operation takes the same lock, so membership checks observe a
/// consistent view relative to concurrent adds and removes.
#[derive(Debug)]
pub struct TransactionPool {
    transactions: Mutex<HashMap<Sha256Hash, Transaction>>,
    coinbase_reward: f64,
}

impl TransactionPool {
    /// Creates an empty pool validating against `coinbase_reward`
    pub fn new(coinbase_reward: f64) -> Self {
        TransactionPool {
            transactions: Mutex::new(HashMap::new()),
            coinbase_reward,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Sha256Hash, Transaction>> {
        self.transactions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates and inserts a transaction
    ///
    /// # Returns
    ///
    /// `true` if it was new, `false` if an equal transaction was already pooled
    pub fn add(&self, transaction: Transaction) -> Result<bool, PoolError> {
        self.validate(&transaction)?;
        Ok(self.insert(transaction))
    }

    /// Checks that `transaction` may be pooled without touching the pool
    pub fn validate(&self, transaction: &Transaction) -> Result<(), PoolError> {
        if transaction.coinbase {
            return Err(PoolError::CoinbaseNotAllowed);
        }

        if let Err(err) = transaction.validate(self.coinbase_reward) {
            warn!("Rejected transaction {}: {}", transaction.hash, err);
            return Err(err.into());
        }
        Ok(())
    }

    /// Inserts a transaction already checked with [`TransactionPool::validate`]
    pub(crate) fn insert(&self, transaction: Transaction) -> bool {
        let mut transactions = self.lock();
        if transactions.contains_key(&transaction.hash) {
            debug!("Transaction {} already pooled", transaction.hash);
            return false;
        }
        transactions.insert(transaction.hash, transaction);
        true
    }

    pub fn remove(&self, transaction: &Transaction) {
        self.lock().remove(&transaction.hash);
    }

    /// Removes every transaction of `transactions` under a single lock
    pub fn remove_all<'a, I>(&self, transactions: I)
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut pooled = self.lock();
        for transaction in transactions {
            pooled.remove(&transaction.hash);
        }
    }

    pub fn contains(&self, transaction: &Transaction) -> bool {
        self.lock().contains_key(&transaction.hash)
    }

    pub fn contains_all<'a, I>(&self, transactions: I) -> bool
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let pooled = self.lock();
        transactions
            .into_iter()
            .all(|transaction| pooled.contains_key(&transaction.hash))
    }

    /// Copy of the current contents, in no particular order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
