use log::{info, warn};
use thiserror::Error;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ConsensusConfig;

use super::block::Block;
use super::crypto::{Address, Sha256Hash};
use super::ledger::{BalanceLedger, LedgerError};
use super::pool::{PoolError, TransactionPool};
use super::transaction::Transaction;

/// Reasons a block, transaction or chain is refused
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Block has an invalid Merkle root or hash")]
    InvalidStructure,

    #[error("Block does not extend the chain tip: expected previous hash {expected}, got {got}")]
    InvalidLinkage { expected: String, got: String },

    #[error("Block carries {count} transactions, limit is {max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("Invalid coinbase: {0}")]
    InvalidCoinbase(String),

    #[error("Transaction {0} appears more than once in the block")]
    DuplicateTransaction(String),

    #[error("Transaction {0} is already confirmed")]
    AlreadyConfirmed(String),

    #[error("Block contains transactions that are not in the pool")]
    TransactionsNotInPool,

    #[error("Block hash has {actual} leading zero bytes, {required} required")]
    InsufficientDifficulty { required: usize, actual: usize },

    #[error("Settlement failed: {0}")]
    Settlement(#[from] LedgerError),

    #[error("Transaction rejected: {0}")]
    Pool(#[from] PoolError),

    #[error("Invalid chain at height {height}: {reason}")]
    InvalidChain {
        height: usize,
        reason: Box<BlockchainError>,
    },
}

fn describe(hash: Option<Sha256Hash>) -> String {
    hash.map(|hash| hash.to_hex()).unwrap_or_else(|| "null".to_string())
}

/// Accepted blocks plus everything derived from them
#[derive(Debug, Default)]
struct ChainState {
    blocks: Vec<Block>,
    ledger: BalanceLedger,
    confirmed: HashSet<Sha256Hash>,
}

impl ChainState {
    fn tip_hash(&self) -> Option<Sha256Hash> {
        self.blocks.last().map(|block| block.hash)
    }

    /// Runs every acceptance rule against `block` and settles it on a copy of
    /// the ledger. Nothing in `self` is modified.
    fn validate(
        &self,
        block: &Block,
        pool: &TransactionPool,
        config: &ConsensusConfig,
    ) -> Result<BalanceLedger, BlockchainError> {
        if !block.is_structurally_valid() {
            return Err(BlockchainError::InvalidStructure);
        }

        let tip = self.tip_hash();
        if block.previous_hash != tip {
            return Err(BlockchainError::InvalidLinkage {
                expected: describe(tip),
                got: describe(block.previous_hash),
            });
        }

        let count = block.transfers().count();
        if count > config.max_transactions_per_block {
            return Err(BlockchainError::TooManyTransactions {
                count,
                max: config.max_transactions_per_block,
            });
        }

        for (position, transaction) in block.transactions.iter().enumerate() {
            if !transaction.coinbase {
                continue;
            }
            if position != 0 {
                return Err(BlockchainError::InvalidCoinbase(
                    "coinbase must be the first transaction".to_string(),
                ));
            }
            transaction
                .validate(config.coinbase_reward)
                .map_err(|e| BlockchainError::InvalidCoinbase(e.to_string()))?;
        }

        let mut seen = HashSet::new();
        for transaction in &block.transactions {
            if !seen.insert(transaction.hash) {
                return Err(BlockchainError::DuplicateTransaction(transaction.hash.to_hex()));
            }
        }

        // Coinbases are minted per block, so only transfers can be replayed
        if let Some(replayed) = block
            .transfers()
            .find(|transaction| self.confirmed.contains(&transaction.hash))
        {
            return Err(BlockchainError::AlreadyConfirmed(replayed.hash.to_hex()));
        }

        if !pool.contains_all(block.transfers()) {
            return Err(BlockchainError::TransactionsNotInPool);
        }

        let actual = block.leading_zero_bytes();
        if actual < config.difficulty {
            return Err(BlockchainError::InsufficientDifficulty {
                required: config.difficulty,
                actual,
            });
        }

        let mut ledger = self.ledger.clone();
        for transaction in &block.transactions {
            ledger.settle(transaction)?;
        }
        Ok(ledger)
    }
}

/// The chain of accepted blocks and the balance ledger derived from it
///
/// Cloning yields another handle onto the same chain.
#[derive(Debug, Clone)]
pub struct Blockchain {
    state: Arc<Mutex<ChainState>>,
    pool: Arc<TransactionPool>,
    config: Arc<ConsensusConfig>,
}

impl Blockchain {
    /// Creates an empty chain whose blocks must draw their transfers from `pool`
    pub fn new(config: Arc<ConsensusConfig>, pool: Arc<TransactionPool>) -> Self {
        Blockchain {
            state: Arc::new(Mutex::new(ChainState::default())),
            pool,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates `block` and, if every rule holds, appends it at the tip
    ///
    /// Validation, settlement, the push and pool removal happen under one lock,
    /// so two blocks can never both be accepted on top of the same tip. On
    /// failure the chain, ledger and pool are left as they were.
    pub fn append(&self, block: Block) -> Result<(), BlockchainError> {
        let mut state = self.lock();

        let ledger = match state.validate(&block, &self.pool, &self.config) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!("Rejected block {}: {}", block.hash, err);
                return Err(err);
            }
        };

        self.pool.remove_all(block.transfers());
        state.ledger = ledger;
        state
            .confirmed
            .extend(block.transfers().map(|transaction| transaction.hash));

        info!(
            "Accepted block {} at height {} with {} transactions",
            block.hash,
            state.blocks.len(),
            block.transactions.len()
        );
        state.blocks.push(block);

        Ok(())
    }

    /// Adds a transaction to the pool unless it is invalid or already confirmed
    ///
    /// # Returns
    ///
    /// `true` if the transaction was new to the pool
    pub fn add_transaction(&self, transaction: Transaction) -> Result<bool, BlockchainError> {
        self.pool.validate(&transaction)?;

        // Held so a concurrent append cannot confirm it between the check and the insert
        let state = self.lock();

        if state.confirmed.contains(&transaction.hash) {
            return Err(BlockchainError::AlreadyConfirmed(transaction.hash.to_hex()));
        }

        Ok(self.pool.insert(transaction))
    }

    /// Replays `blocks` from genesis into a fresh chain and adopts it if every
    /// block is accepted
    ///
    /// The peer chain's own transfers stand in for the pool during replay. A
    /// failure anywhere leaves the local chain untouched.
    pub fn replace_from(&self, blocks: Vec<Block>) -> Result<(), BlockchainError> {
        let scratch = Blockchain::new(
            self.config.clone(),
            Arc::new(TransactionPool::new(self.config.coinbase_reward)),
        );

        for (height, block) in blocks.into_iter().enumerate() {
            let pooled = block
                .transfers()
                .try_for_each(|transaction| scratch.add_transaction(transaction.clone()).map(|_| ()));
            let replayed = pooled.and_then(|_| scratch.append(block));

            if let Err(reason) = replayed {
                warn!("Refusing peer chain: block {} failed: {}", height, reason);
                return Err(BlockchainError::InvalidChain {
                    height,
                    reason: Box::new(reason),
                });
            }
        }

        let replayed = std::mem::take(&mut *scratch.lock());

        let mut state = self.lock();
        self.pool.remove_all(replayed.blocks.iter().flat_map(|block| block.transfers()));
        info!(
            "Adopted peer chain of {} blocks (was {})",
            replayed.blocks.len(),
            state.blocks.len()
        );
        *state = replayed;

        Ok(())
    }

    /// Gets the entire blockchain
    pub fn blocks(&self) -> Vec<Block> {
        self.lock().blocks.clone()
    }

    pub fn height(&self) -> usize {
        self.lock().blocks.len()
    }

    pub fn tip_hash(&self) -> Option<Sha256Hash> {
        self.lock().tip_hash()
    }

    /// Tip hash and ledger read under the same lock
    pub fn tip_and_ledger(&self) -> (Option<Sha256Hash>, BalanceLedger) {
        let state = self.lock();
        (state.tip_hash(), state.ledger.clone())
    }

    pub fn balance_of(&self, account: &Address) -> f64 {
        self.lock().ledger.balance_of(account)
    }

    pub fn balances(&self) -> Vec<(Address, f64)> {
        self.lock().ledger.accounts()
    }

    pub fn is_confirmed(&self, transaction: &Transaction) -> bool {
        self.lock().confirmed.contains(&transaction.hash)
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Re-checks structure, linkage and difficulty of every block and that the
    /// ledger equals a replay of the chain
    pub fn is_valid(&self) -> bool {
        let state = self.lock();

        let mut previous = None;
        for block in &state.blocks {
            if !block.is_structurally_valid()
                || block.previous_hash != previous
                || block.leading_zero_bytes() < self.config.difficulty
            {
                return false;
            }
            previous = Some(block.hash);
        }

        match BalanceLedger::replay(&state.blocks) {
            Ok(replayed) => replayed == state.ledger,
            Err(_) => false,
        }
    }
}
