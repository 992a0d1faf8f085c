use log::{debug, info, warn};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::node::peers::PeerBroadcast;

use super::block::Block;
use super::chain::Blockchain;
use super::crypto::{Address, Sha256Hash};
use super::ledger::BalanceLedger;
use super::transaction::Transaction;

/// State shared between the [`Miner`] handle and its background thread
struct MiningLoop {
    blockchain: Blockchain,
    broadcaster: Arc<dyn PeerBroadcast>,
    running: Arc<AtomicBool>,
    active_loops: Arc<AtomicUsize>,
}

impl MiningLoop {
    fn run(&self) {
        self.active_loops.fetch_add(1, Ordering::SeqCst);
        info!(
            "Mining started, rewards go to {}",
            self.blockchain.config().coinbase_address.short()
        );

        while self.running.load(Ordering::SeqCst) {
            let Some(block) = self.mine_block() else {
                continue;
            };

            let hash = block.hash;
            match serde_json::to_value(&block) {
                Ok(payload) => match self.blockchain.append(block) {
                    Ok(()) => {
                        info!("Mined block {}", hash);
                        self.broadcaster.broadcast("block", payload);
                    }
                    Err(err) => debug!("Mined block {} lost the race: {}", hash, err),
                },
                Err(err) => warn!("Failed to encode mined block {}: {}", hash, err),
            }
        }

        info!("Mining stopped");
        self.active_loops.fetch_sub(1, Ordering::SeqCst);
    }

    /// One mining round: assemble a candidate on the current tip and search
    /// for a nonce. `None` when stopped or when the tip moved meanwhile.
    fn mine_block(&self) -> Option<Block> {
        let (tip, ledger) = self.blockchain.tip_and_ledger();
        let candidate = self.assemble_candidate(tip, &ledger);
        self.search(tip, candidate)
    }

    /// Builds a block of affordable pool transactions behind a fresh coinbase
    ///
    /// Transfers are settled one by one against a private ledger holding only
    /// the pool senders' balances, so the candidate never double-spends.
    /// Skipped transfers stay in the pool.
    fn assemble_candidate(&self, tip: Option<Sha256Hash>, ledger: &BalanceLedger) -> Block {
        let config = self.blockchain.config();
        let pending = self.blockchain.pool().snapshot();

        let senders: HashSet<&Address> = pending
            .iter()
            .filter_map(|transaction| transaction.sender.as_ref())
            .collect();
        let mut balances = BalanceLedger::snapshot_of(ledger, senders);

        let mut transactions = vec![Transaction::new_coinbase(
            config.coinbase_address.clone(),
            config.coinbase_reward,
        )];

        for transaction in &pending {
            if transactions.len() > config.max_transactions_per_block {
                break;
            }

            let funded = transaction
                .sender
                .as_ref()
                .map_or(false, |sender| balances.account_exists(sender));
            if !funded {
                debug!("Skipping {}: sender has never received funds", transaction.hash);
                continue;
            }

            match balances.settle(transaction) {
                Ok(()) => transactions.push(transaction.clone()),
                Err(err) => debug!("Skipping {}: {}", transaction.hash, err),
            }
        }

        Block::new(tip, transactions, 0)
    }

    /// Tries nonces from the candidate's upwards until the difficulty is met
    fn search(&self, tip: Option<Sha256Hash>, mut candidate: Block) -> Option<Block> {
        let difficulty = self.blockchain.config().difficulty;

        while self.running.load(Ordering::SeqCst) {
            if self.blockchain.tip_hash() != tip {
                debug!("Chain tip moved, abandoning candidate");
                return None;
            }

            if candidate.leading_zero_bytes() >= difficulty {
                return Some(candidate);
            }

            let nonce = candidate.nonce.wrapping_add(1);
            candidate = candidate.with_nonce(nonce);
        }

        None
    }
}

/// Handle controlling the background mining thread
///
/// Stopped → Running → Stopped. Cancellation is cooperative: the loop polls
/// the running flag before every nonce attempt.
pub struct Miner {
    blockchain: Blockchain,
    broadcaster: Arc<dyn PeerBroadcast>,
    running: Arc<AtomicBool>,
    active_loops: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(blockchain: Blockchain, broadcaster: Arc<dyn PeerBroadcast>) -> Self {
        Miner {
            blockchain,
            broadcaster,
            running: Arc::new(AtomicBool::new(false)),
            active_loops: Arc::new(AtomicUsize::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the mining loop unless one is already running
    ///
    /// # Returns
    ///
    /// `true` if a new loop was spawned
    pub fn start(&self) -> bool {
        let mut worker = self.lock_worker();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }

        // A loop that was only signalled to stop must exit before the flag is raised again
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                warn!("Mining thread panicked");
            }
        }

        info!("Starting miner");
        self.running.store(true, Ordering::SeqCst);
        let mining_loop = MiningLoop {
            blockchain: self.blockchain.clone(),
            broadcaster: self.broadcaster.clone(),
            running: self.running.clone(),
            active_loops: self.active_loops.clone(),
        };

        let handle = thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || mining_loop.run());

        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(err) => {
                warn!("Failed to spawn mining thread: {}", err);
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Signals the loop to stop without waiting for it
    pub fn stop(&self) {
        info!("Stopping miner");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Signals the loop to stop and waits until it has exited
    pub fn shutdown(&self) {
        self.stop();
        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Mining thread panicked");
            }
        }
    }

    /// Stops the current loop, waits for it to exit, then starts a new one
    ///
    /// Waiting guarantees the old and new loops never overlap.
    pub fn restart(&self) -> bool {
        info!("Restarting miner");
        self.shutdown();
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of mining loops currently executing
    pub fn active_loops(&self) -> usize {
        self.active_loops.load(Ordering::SeqCst)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
