use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use std::collections::VecDeque;

use super::crypto::Sha256Hash;
use super::transaction::Transaction;

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Hash of the block header
    #[schema(value_type = String)]
    pub hash: Sha256Hash,

    /// Hash of the previous block, absent only for the genesis block
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub previous_hash: Option<Sha256Hash>,

    /// Transactions included in this block, coinbase first
    pub transactions: Vec<Transaction>,

    /// Proof of work
    pub nonce: u64,

    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Merkle root of the transaction hashes
    #[schema(value_type = String)]
    pub merkle_root: Sha256Hash,
}

impl Block {
    /// Creates a new block
    ///
    /// # Arguments
    ///
    /// * `previous_hash` - The hash of the chain tip, `None` for genesis
    /// * `transactions` - The transactions to include, coinbase first
    /// * `nonce` - The proof of work
    ///
    /// # Returns
    ///
    /// A new Block with its Merkle root and hash computed
    pub fn new(previous_hash: Option<Sha256Hash>, transactions: Vec<Transaction>, nonce: u64) -> Self {
        let merkle_root = merkle_root(&transactions);
        let mut block = Block {
            hash: Sha256Hash::ZERO,
            previous_hash,
            transactions,
            nonce,
            timestamp: Utc::now().timestamp_millis(),
            merkle_root,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Same block content with a different nonce; only the header hash is recomputed
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.hash = self.calculate_hash();
        self
    }

    /// Calculates the header hash
    ///
    /// Transactions take part only through the Merkle root.
    pub fn calculate_hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        if let Some(previous_hash) = &self.previous_hash {
            hasher.update(previous_hash.as_bytes());
        }
        hasher.update(self.merkle_root.as_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        Sha256Hash(hasher.finalize().into())
    }

    pub fn leading_zero_bytes(&self) -> usize {
        self.hash.leading_zero_bytes()
    }

    /// Stored Merkle root and hash both match the content
    pub fn is_structurally_valid(&self) -> bool {
        if self.merkle_root != merkle_root(&self.transactions) {
            warn!("Block {} has an invalid Merkle root", self.hash);
            return false;
        }

        if self.hash != self.calculate_hash() {
            warn!("Block {} has an invalid hash", self.hash);
            return false;
        }

        true
    }

    /// Transactions other than the coinbase reward
    pub fn transfers(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|transaction| !transaction.coinbase)
    }
}

/// Reduces the transaction hashes to a single root
///
/// The two hashes at the front of the queue are combined and the result goes
/// to the back, until one is left. An odd leftover therefore pairs with a
/// combined hash on the next pass rather than being duplicated.
pub fn merkle_root(transactions: &[Transaction]) -> Sha256Hash {
    let mut queue: VecDeque<Sha256Hash> =
        transactions.iter().map(|transaction| transaction.hash).collect();

    while queue.len() > 1 {
        if let (Some(left), Some(right)) = (queue.pop_front(), queue.pop_front()) {
            queue.push_back(Sha256Hash::combine(&left, &right));
        }
    }

    queue.pop_front().unwrap_or(Sha256Hash::ZERO)
}
