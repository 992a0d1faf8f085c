use log::{info, warn};
use thiserror::Error;

use std::sync::Arc;

use crate::blockchain::{Block, Blockchain, BlockchainError, Miner, Transaction};

use super::peers::{ChainSync, PeerBroadcast, PeerError};

/// Outcome of joining the network through a master node
#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Height of the adopted chain
    pub chain_height: usize,

    /// Pool entries accepted from the master
    pub pooled: usize,

    /// Pool entries refused as invalid or already confirmed
    pub skipped: usize,

    /// Peers advertised by the master
    pub peers: Vec<String>,
}

/// Errors that abort a bootstrap
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to fetch from master: {0}")]
    Peer(#[from] PeerError),

    #[error("Master chain refused: {0}")]
    Chain(#[from] BlockchainError),
}

/// Entry point for blocks and transactions arriving from clients and peers
pub struct NodeService {
    blockchain: Blockchain,
    broadcaster: Arc<dyn PeerBroadcast>,
    miner: Arc<Miner>,
}

impl NodeService {
    pub fn new(blockchain: Blockchain, broadcaster: Arc<dyn PeerBroadcast>, miner: Arc<Miner>) -> Self {
        NodeService {
            blockchain,
            broadcaster,
            miner,
        }
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    /// Appends a block received from outside; when accepted and `propagate`
    /// is set it is forwarded to every peer
    pub fn accept_block(&self, block: Block, propagate: bool) -> Result<(), BlockchainError> {
        let payload = if propagate {
            serde_json::to_value(&block).ok()
        } else {
            None
        };

        self.blockchain.append(block)?;

        if let Some(payload) = payload {
            self.broadcaster.broadcast("block", payload);
        }
        Ok(())
    }

    /// Pools a transaction received from outside; when accepted and
    /// `propagate` is set it is forwarded to every peer
    ///
    /// Forwarded copies carry no `propagate` flag, so peers do not relay them further.
    ///
    /// # Returns
    ///
    /// `true` if the transaction was new to the pool
    pub fn accept_transaction(&self, transaction: Transaction, propagate: bool) -> Result<bool, BlockchainError> {
        let payload = if propagate {
            serde_json::to_value(&transaction).ok()
        } else {
            None
        };

        let added = self.blockchain.add_transaction(transaction)?;

        if let Some(payload) = payload {
            self.broadcaster.broadcast("transaction", payload);
        }
        Ok(added)
    }

    /// Adopts the master's chain, then seeds the pool with its pending transactions
    ///
    /// A failed peer list fetch is tolerated; a failed chain fetch or replay
    /// aborts and leaves local state untouched.
    pub async fn bootstrap(&self, sync: &dyn ChainSync, master: &str) -> Result<BootstrapReport, BootstrapError> {
        info!("Bootstrapping from {}", master);

        let peers = sync.fetch_peers(master).await.unwrap_or_else(|err| {
            warn!("Failed to fetch peers from {}: {}", master, err);
            Vec::new()
        });

        let chain = sync.fetch_chain(master).await?;
        self.blockchain.replace_from(chain)?;

        let mut report = BootstrapReport {
            chain_height: self.blockchain.height(),
            peers,
            ..BootstrapReport::default()
        };

        match sync.fetch_pool(master).await {
            Ok(pending) => {
                for transaction in pending {
                    match self.blockchain.add_transaction(transaction) {
                        Ok(_) => report.pooled += 1,
                        Err(err) => {
                            warn!("Skipping pooled transaction from {}: {}", master, err);
                            report.skipped += 1;
                        }
                    }
                }
            }
            Err(err) => warn!("Failed to fetch pool from {}: {}", master, err),
        }

        info!(
            "Bootstrap complete: height {}, {} pooled, {} skipped",
            report.chain_height, report.pooled, report.skipped
        );
        Ok(report)
    }
}
