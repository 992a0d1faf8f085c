use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::blockchain::Address;

/// Errors that can occur while loading the node configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Consensus parameters shared by the chain, the pool and the miner
#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Maximum number of transactions per block, not counting the coinbase
    #[serde(default = "default_max_transactions_per_block")]
    pub max_transactions_per_block: usize,

    /// Minimum number of leading zero bytes in a block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,

    /// Exact amount paid by every coinbase transaction
    #[serde(default = "default_coinbase_reward")]
    pub coinbase_reward: f64,

    /// Account credited with this node's mining rewards
    pub coinbase_address: Address,

    /// Whether the mining loop starts with the node
    #[serde(default = "default_mining_enabled")]
    pub mining_enabled: bool,
}

fn default_max_transactions_per_block() -> usize {
    10
}

fn default_difficulty() -> usize {
    2
}

fn default_coinbase_reward() -> f64 {
    50.0
}

fn default_mining_enabled() -> bool {
    true
}

impl ConsensusConfig {
    /// Default parameters paying rewards to `coinbase_address`
    pub fn new(coinbase_address: Address) -> Self {
        ConsensusConfig {
            max_transactions_per_block: default_max_transactions_per_block(),
            difficulty: default_difficulty(),
            coinbase_reward: default_coinbase_reward(),
            coinbase_address,
            mining_enabled: default_mining_enabled(),
        }
    }

    pub fn with_difficulty(mut self, difficulty: usize) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_max_transactions_per_block(mut self, max: usize) -> Self {
        self.max_transactions_per_block = max;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_transactions_per_block == 0 {
            return Err(ConfigError::Invalid(
                "max_transactions_per_block must be at least 1".to_string(),
            ));
        }

        if self.difficulty > 32 {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds the 32 bytes of a SHA-256 digest",
                self.difficulty
            )));
        }

        if !(self.coinbase_reward.is_finite() && self.coinbase_reward > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "coinbase_reward must be positive, got {}",
                self.coinbase_reward
            )));
        }

        self.coinbase_address.to_public_key().map_err(|e| {
            ConfigError::Invalid(format!("coinbase_address is not a public key: {}", e))
        })?;

        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Peer network settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    /// Node to bootstrap from; a node whose public URL equals it runs as master
    #[serde(default)]
    pub master_node_url: Option<String>,

    /// URL under which peers reach this node
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Complete node configuration, built once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    pub consensus: ConsensusConfig,
}

impl NodeConfig {
    /// Loads `config/node.toml` (or the file named by `NODE_CONFIG`), then
    /// `NODE__SECTION__KEY` environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("NODE_CONFIG").unwrap_or_else(|_| "config/node".to_string());

        let config: NodeConfig = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("NODE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.consensus.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without consulting files or the environment
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = Config::builder()
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.consensus.validate()?;
        Ok(config)
    }

    pub fn public_url(&self) -> String {
        self.network
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;

    #[test]
    fn test_defaults_apply() {
        let wallet = Wallet::generate();
        let document = format!(
            "[consensus]\ncoinbase_address = \"{}\"\n",
            wallet.address()
        );

        let config = NodeConfig::from_toml(&document).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.consensus.max_transactions_per_block, 10);
        assert_eq!(config.consensus.difficulty, 2);
        assert_eq!(config.consensus.coinbase_reward, 50.0);
        assert!(config.consensus.mining_enabled);
        assert!(config.network.master_node_url.is_none());
        assert_eq!(config.public_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_full_document() {
        let wallet = Wallet::generate();
        let document = format!(
            r#"
[server]
host = "0.0.0.0"
port = 9000

[network]
master_node_url = "http://10.0.0.1:8080"
public_url = "http://10.0.0.2:9000"

[consensus]
max_transactions_per_block = 3
difficulty = 1
coinbase_reward = 12.5
coinbase_address = "{}"
mining_enabled = false
"#,
            wallet.address()
        );

        let config = NodeConfig::from_toml(&document).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.consensus.max_transactions_per_block, 3);
        assert_eq!(config.consensus.coinbase_reward, 12.5);
        assert!(!config.consensus.mining_enabled);
        assert_eq!(config.public_url(), "http://10.0.0.2:9000");
        assert_eq!(
            config.network.master_node_url.as_deref(),
            Some("http://10.0.0.1:8080")
        );
    }

    #[test]
    fn test_invalid_values_are_fatal() {
        let wallet = Wallet::generate();

        let missing_address = "[consensus]\ndifficulty = 1\n";
        assert!(NodeConfig::from_toml(missing_address).is_err());

        let bad_address = "[consensus]\ncoinbase_address = \"xyz\"\n";
        assert!(matches!(
            NodeConfig::from_toml(bad_address),
            Err(ConfigError::Invalid(_))
        ));

        let zero_reward = format!(
            "[consensus]\ncoinbase_address = \"{}\"\ncoinbase_reward = 0.0\n",
            wallet.address()
        );
        assert!(matches!(
            NodeConfig::from_toml(&zero_reward),
            Err(ConfigError::Invalid(_))
        ));

        let too_hard = format!(
            "[consensus]\ncoinbase_address = \"{}\"\ndifficulty = 33\n",
            wallet.address()
        );
        assert!(matches!(
            NodeConfig::from_toml(&too_hard),
            Err(ConfigError::Invalid(_))
        ));
    }
}
