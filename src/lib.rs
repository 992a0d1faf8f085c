//! Account-based proof-of-work node
//!
//! The `powledger` binary wires these modules into an HTTP server; they are
//! exposed here so other tools can embed the chain or talk to peers.

pub mod api;
pub mod blockchain;
pub mod config;
pub mod node;
