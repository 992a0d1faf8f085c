use thiserror::Error;

use std::collections::HashMap;

use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Errors that can occur while settling transactions
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Transaction {0} has no recipient")]
    MissingRecipient(String),

    #[error("Transaction {0} has no sender")]
    MissingSender(String),
}

/// Balance per account, derived from settled transactions
///
/// An account that has never received anything is absent and reads as zero.
#[derive(Debug, Clone, Default)]
pub struct BalanceLedger {
    balances: HashMap<Address, f64>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a temporary ledger holding only `accounts` copied from `source`
    ///
    /// Accounts unknown to `source` stay unknown in the snapshot, so they
    /// cannot spend in it either.
    pub fn snapshot_of<'a, I>(source: &BalanceLedger, accounts: I) -> Self
    where
        I: IntoIterator<Item = &'a Address>,
    {
        let mut snapshot = BalanceLedger::new();
        for account in accounts {
            if let Some(balance) = source.balances.get(account) {
                snapshot.balances.insert(account.clone(), *balance);
            }
        }
        snapshot
    }

    /// Rebuilds the ledger by settling every transaction of `blocks` in order
    pub fn replay<'a, I>(blocks: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let mut ledger = BalanceLedger::new();
        for block in blocks {
            for transaction in &block.transactions {
                ledger.settle(transaction)?;
            }
        }
        Ok(ledger)
    }

    pub fn balance_of(&self, account: &Address) -> f64 {
        self.balances.get(account).copied().unwrap_or(0.0)
    }

    pub fn account_exists(&self, account: &Address) -> bool {
        self.balances.contains_key(account)
    }

    pub fn credit(&mut self, account: &Address, amount: f64) {
        *self.balances.entry(account.clone()).or_insert(0.0) += amount;
    }

    /// Applies one transaction
    ///
    /// Coinbase rewards credit the recipient unconditionally. Transfers move
    /// `amount` from sender to recipient, or fail without touching any balance.
    pub fn settle(&mut self, transaction: &Transaction) -> Result<(), LedgerError> {
        let recipient = transaction
            .recipient
            .as_ref()
            .ok_or_else(|| LedgerError::MissingRecipient(transaction.hash.to_hex()))?;

        if transaction.coinbase {
            self.credit(recipient, transaction.amount);
            return Ok(());
        }

        let sender = transaction
            .sender
            .as_ref()
            .ok_or_else(|| LedgerError::MissingSender(transaction.hash.to_hex()))?;

        let available = self.balance_of(sender);
        if available < transaction.amount {
            return Err(LedgerError::InsufficientFunds {
                required: transaction.amount,
                available,
            });
        }

        self.credit(sender, -transaction.amount);
        self.credit(recipient, transaction.amount);
        Ok(())
    }

    /// All known accounts and their balances
    pub fn accounts(&self) -> Vec<(Address, f64)> {
        self.balances
            .iter()
            .map(|(address, balance)| (address.clone(), *balance))
            .collect()
    }
}

impl PartialEq for BalanceLedger {
    fn eq(&self, other: &Self) -> bool {
        self.balances == other.balances
    }
}
