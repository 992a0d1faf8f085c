// Node module
//
// Peer networking and the service that feeds outside blocks and transactions
// into the chain.

pub mod peers;
pub mod service;

pub use peers::{ChainSync, PeerBroadcast, PeerError, PeerNetwork};
pub use service::{BootstrapError, BootstrapReport, NodeService};
