use async_trait::async_trait;
use dashmap::DashSet;
use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::blockchain::{Block, Transaction};

/// Errors that can occur while talking to peers
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Invalid peer URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Best-effort fan-out of a payload to every known peer
///
/// Implementations must not block the caller on network I/O and must swallow
/// per-peer failures.
pub trait PeerBroadcast: Send + Sync {
    fn broadcast(&self, endpoint: &str, payload: Value);
}

/// Pulls state from a peer when joining the network
#[async_trait]
pub trait ChainSync: Send + Sync {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError>;

    async fn fetch_pool(&self, peer: &str) -> Result<Vec<Transaction>, PeerError>;

    async fn fetch_peers(&self, peer: &str) -> Result<Vec<String>, PeerError>;
}

/// Parses a peer URL into the form stored in the registry (no trailing slash)
pub fn normalize_url(url: &str) -> Result<String, PeerError> {
    let parsed = Url::parse(url.trim()).map_err(|e| PeerError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PeerError::InvalidUrl(format!("unsupported scheme in {}", url)));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn endpoint_url(peer: &str, endpoint: &str) -> String {
    format!("{}/{}", peer.trim_end_matches('/'), endpoint)
}

/// Sends `payload` to `endpoint` on every target; failures are logged and dropped
async fn send_to_all(client: Client, targets: Vec<String>, method: Method, endpoint: String, payload: Value) {
    let requests = targets.into_iter().map(|peer| {
        let request = client
            .request(method.clone(), endpoint_url(&peer, &endpoint))
            .json(&payload);
        let method = method.clone();
        let endpoint = endpoint.clone();
        async move {
            match request.send().await.and_then(|response| response.error_for_status()) {
                Ok(_) => debug!("{} /{} delivered to {}", method, endpoint, peer),
                Err(err) => warn!("{} /{} to {} failed: {}", method, endpoint, peer, err),
            }
        }
    });

    join_all(requests).await;
}

/// Registry of known peers plus the HTTP client used to reach them
#[derive(Debug)]
pub struct PeerNetwork {
    own_url: String,
    peers: DashSet<String>,
    client: Client,
    runtime: Handle,
}

impl PeerNetwork {
    /// Creates an empty registry; broadcasts are spawned onto `runtime`
    pub fn new(own_url: &str, runtime: Handle) -> Result<Self, PeerError> {
        Ok(PeerNetwork {
            own_url: normalize_url(own_url)?,
            peers: DashSet::new(),
            client: Client::new(),
            runtime,
        })
    }

    pub fn own_url(&self) -> &str {
        &self.own_url
    }

    /// Adds a peer; this node's own URL is never registered
    ///
    /// # Returns
    ///
    /// `true` if the peer was not known before
    pub fn register(&self, url: &str) -> Result<bool, PeerError> {
        let url = normalize_url(url)?;
        if url == self.own_url {
            return Ok(false);
        }
        let added = self.peers.insert(url.clone());
        if added {
            info!("Registered peer {}", url);
        }
        Ok(added)
    }

    pub fn unregister(&self, url: &str) -> Result<bool, PeerError> {
        let url = normalize_url(url)?;
        let removed = self.peers.remove(&url).is_some();
        if removed {
            info!("Unregistered peer {}", url);
        }
        Ok(removed)
    }

    /// Known peers, sorted
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().map(|peer| peer.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Tells every peer about this node and waits for the requests to finish
    pub async fn announce_arrival(&self) {
        let payload = Value::String(self.own_url.clone());
        send_to_all(self.client.clone(), self.peers(), Method::POST, "node".to_string(), payload).await;
    }

    /// Asks every peer to forget this node and waits for the requests to finish
    pub async fn announce_departure(&self) {
        let payload = Value::String(self.own_url.clone());
        send_to_all(self.client.clone(), self.peers(), Method::DELETE, "node".to_string(), payload).await;
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, peer: &str, endpoint: &str) -> Result<T, PeerError> {
        let response = self
            .client
            .get(endpoint_url(peer, endpoint))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

impl PeerBroadcast for PeerNetwork {
    fn broadcast(&self, endpoint: &str, payload: Value) {
        let targets = self.peers();
        if targets.is_empty() {
            return;
        }

        self.runtime.spawn(send_to_all(
            self.client.clone(),
            targets,
            Method::POST,
            endpoint.to_string(),
            payload,
        ));
    }
}

#[async_trait]
impl ChainSync for PeerNetwork {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        self.get(peer, "block").await
    }

    async fn fetch_pool(&self, peer: &str) -> Result<Vec<Transaction>, PeerError> {
        self.get(peer, "transaction").await
    }

    async fn fetch_peers(&self, peer: &str) -> Result<Vec<String>, PeerError> {
        self.get(peer, "node").await
    }
}

/// Broadcaster that records instead of sending
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingBroadcaster {
    sent: std::sync::Mutex<Vec<(String, Value)>>,
}

#[cfg(test)]
impl RecordingBroadcaster {
    pub(crate) fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl PeerBroadcast for RecordingBroadcaster {
    fn broadcast(&self, endpoint: &str, payload: Value) {
        self.sent.lock().unwrap().push((endpoint.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("http://10.0.0.1:8080/").unwrap(), "http://10.0.0.1:8080");
        assert_eq!(normalize_url(" http://peer:9000 ").unwrap(), "http://peer:9000");
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("ftp://peer").is_err());
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("http://peer:1/", "block"), "http://peer:1/block");
    }

    #[tokio::test]
    async fn test_registry() {
        let network = PeerNetwork::new("http://127.0.0.1:8080", Handle::current()).unwrap();

        assert!(!network.register("http://127.0.0.1:8080/").unwrap());
        assert!(network.register("http://10.0.0.2:8080").unwrap());
        assert!(!network.register("http://10.0.0.2:8080/").unwrap());
        assert!(network.register("http://10.0.0.1:8080").unwrap());
        assert!(network.register("bogus").is_err());

        assert_eq!(network.peers(), vec!["http://10.0.0.1:8080", "http://10.0.0.2:8080"]);

        assert!(network.unregister("http://10.0.0.2:8080").unwrap());
        assert!(!network.unregister("http://10.0.0.2:8080").unwrap());
        assert_eq!(network.peers(), vec!["http://10.0.0.1:8080"]);
    }

    #[tokio::test]
    async fn test_unreachable_peers_are_swallowed() {
        let network = PeerNetwork::new("http://127.0.0.1:8080", Handle::current()).unwrap();
        // Port 9 (discard) on localhost is not served by anything here
        network.register("http://127.0.0.1:9").unwrap();
        network.register("http://127.0.0.1:10").unwrap();

        network.announce_arrival().await;
        network.broadcast("block", Value::Null);
        assert!(network.fetch_chain("http://127.0.0.1:9").await.is_err());
    }
}
