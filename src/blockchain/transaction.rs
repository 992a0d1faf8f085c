use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::hash::{Hash, Hasher};

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Sha256Hash, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction has no recipient")]
    MissingRecipient,

    #[error("Transaction has no sender")]
    MissingSender,

    #[error("Transaction not signed")]
    NotSigned,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Transaction hash does not match its content")]
    HashMismatch,

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Coinbase must pay exactly {expected}, got {got}")]
    InvalidCoinbaseAmount { expected: f64, got: f64 },

    #[error("Coinbase transaction must not carry a sender or signature")]
    MalformedCoinbase,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A signed transfer between two accounts, or an unsigned coinbase reward
///
/// Identity is the content hash: two transactions are equal when their hashes
/// are, regardless of any other field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// SHA-256 of amount, sender, recipient and timestamp
    #[schema(value_type = String)]
    pub hash: Sha256Hash,

    /// Sender's address, absent for coinbase transactions
    #[serde(default)]
    pub sender: Option<Address>,

    /// Recipient's address
    #[serde(default)]
    pub recipient: Option<Address>,

    /// Amount being transferred
    pub amount: f64,

    /// Sender's signature over the signed content, absent for coinbase transactions
    #[serde(default)]
    pub signature: Option<DigitalSignature>,

    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Whether this transaction is a mining reward
    #[serde(default)]
    pub coinbase: bool,
}

impl Transaction {
    /// Creates a transfer stamped with the current time
    ///
    /// The signature may be supplied here or attached later with [`Transaction::sign`];
    /// it is not part of the hash either way.
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: f64,
        signature: Option<DigitalSignature>,
    ) -> Self {
        Self::with_timestamp(sender, recipient, amount, signature, Utc::now().timestamp_millis())
    }

    /// Creates a transfer with an explicit creation time
    pub fn with_timestamp(
        sender: Address,
        recipient: Address,
        amount: f64,
        signature: Option<DigitalSignature>,
        timestamp: i64,
    ) -> Self {
        let mut transaction = Transaction {
            hash: Sha256Hash::ZERO,
            sender: Some(sender),
            recipient: Some(recipient),
            amount,
            signature,
            timestamp,
            coinbase: false,
        };
        transaction.hash = transaction.calculate_hash();
        transaction
    }

    /// Creates a coinbase transaction (mining reward)
    pub fn new_coinbase(recipient: Address, amount: f64) -> Self {
        let mut transaction = Transaction {
            hash: Sha256Hash::ZERO,
            sender: None,
            recipient: Some(recipient),
            amount,
            signature: None,
            timestamp: Utc::now().timestamp_millis(),
            coinbase: true,
        };
        transaction.hash = transaction.calculate_hash();
        transaction
    }

    /// Creates a transfer from `wallet` and signs it in one step
    pub fn signed(wallet: &Wallet, recipient: Address, amount: f64) -> Self {
        let mut transaction = Self::new(wallet.address().clone(), recipient, amount, None);
        transaction.signature = Some(wallet.sign(&transaction.content_for_signing()));
        transaction
    }

    /// The bytes covered by the signature and the hash
    ///
    /// Amount in decimal text, sender, recipient, then the timestamp as an
    /// 8-byte big-endian integer. Absent parties contribute nothing.
    pub fn content_for_signing(&self) -> Vec<u8> {
        let mut content = format!("{:?}", self.amount).into_bytes();
        if let Some(sender) = &self.sender {
            content.extend_from_slice(sender.as_bytes());
        }
        if let Some(recipient) = &self.recipient {
            content.extend_from_slice(recipient.as_bytes());
        }
        content.extend_from_slice(&self.timestamp.to_be_bytes());
        content
    }

    pub fn calculate_hash(&self) -> Sha256Hash {
        Sha256Hash::digest(&self.content_for_signing())
    }

    /// Checks every validity rule, returning the first one violated
    pub fn validate(&self, coinbase_reward: f64) -> Result<(), TransactionError> {
        if self.recipient.is_none() {
            return Err(TransactionError::MissingRecipient);
        }

        if !self.coinbase && self.signature.is_none() {
            return Err(TransactionError::NotSigned);
        }

        if self.hash != self.calculate_hash() {
            return Err(TransactionError::HashMismatch);
        }

        if self.coinbase {
            if self.sender.is_some() || self.signature.is_some() {
                return Err(TransactionError::MalformedCoinbase);
            }
            if self.amount != coinbase_reward {
                return Err(TransactionError::InvalidCoinbaseAmount {
                    expected: coinbase_reward,
                    got: self.amount,
                });
            }
            return Ok(());
        }

        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(TransactionError::InvalidAmount(self.amount));
        }

        let sender = self.sender.as_ref().ok_or(TransactionError::MissingSender)?;
        let signature = self.signature.as_ref().ok_or(TransactionError::NotSigned)?;

        if !verify_signature(&self.content_for_signing(), signature, sender)? {
            return Err(TransactionError::InvalidSignature);
        }

        Ok(())
    }

    /// Non-failing form of [`Transaction::validate`]; violations are logged
    pub fn is_valid(&self, coinbase_reward: f64) -> bool {
        match self.validate(coinbase_reward) {
            Ok(()) => true,
            Err(err) => {
                warn!("Transaction {} is invalid: {}", self.hash, err);
                false
            }
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}
