// Blockchain module
//
// Core ledger types: transactions, blocks with their Merkle root, the balance
// ledger, the transaction pool, the chain itself and the proof-of-work miner.

pub mod block;
pub mod chain;
pub mod crypto;
pub mod ledger;
pub mod miner;
pub mod pool;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use crypto::{Address, Sha256Hash, Wallet};
pub use miner::Miner;
pub use pool::TransactionPool;
pub use transaction::Transaction;
