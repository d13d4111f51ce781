//! Node configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{NodeError, Result};

/// Silo node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hostname other peers dial this node at.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Transport port for RPC ingress and shard transfers.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the node's Ed25519 identity key.
    #[serde(default = "default_identity_path")]
    pub identity_path: PathBuf,

    /// Shard storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Contract database directory.
    #[serde(default = "default_contracts_path")]
    pub contracts_path: PathBuf,

    /// Transfer token configuration.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Offer auction configuration.
    #[serde(default)]
    pub offers: OfferConfig,

    /// Renter extended public keys this farmer accepts claims from.
    /// `"*"` accepts anyone; empty rejects all claims.
    #[serde(default)]
    pub claims: Vec<String>,

    /// Capacity announcement and cache configuration.
    #[serde(default)]
    pub capacity: CapacityConfig,

    /// Contract reaping configuration.
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Metrics server configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory shard bytes are stored under.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Bytes of disk sold to the network.
    #[serde(default = "default_allocated_bytes")]
    pub allocated_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Transfer token lifetime in seconds (default: 30 minutes).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Maximum accepted RPC envelope size in bytes.
    #[serde(default = "default_max_rpc_body")]
    pub max_rpc_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferConfig {
    /// Default acceptance budget for a published descriptor.
    #[serde(default = "default_max_offers")]
    pub max_offers: usize,

    /// Farmer identities never admitted to an auction.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Whether this node announces farmer capacity.
    #[serde(default = "default_true")]
    pub announce: bool,

    /// Interval between capacity announcements in seconds.
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Cached announcements older than this are dropped.
    #[serde(default = "default_capacity_max_age")]
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Interval between reaping sweeps in seconds.
    #[serde(default = "default_reap_interval")]
    pub interval_secs: u64,

    /// Grace margin past `store_end` before a contract is reaped, in
    /// milliseconds.
    #[serde(default = "default_reap_grace")]
    pub grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics server port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_identity_path() -> PathBuf {
    PathBuf::from("identity.key")
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("shards")
}

fn default_allocated_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_contracts_path() -> PathBuf {
    PathBuf::from("contracts.db")
}

fn default_token_ttl() -> u64 {
    30 * 60
}

fn default_max_rpc_body() -> usize {
    1024 * 1024
}

fn default_max_offers() -> usize {
    12
}

fn default_true() -> bool {
    true
}

fn default_announce_interval() -> u64 {
    15 * 60
}

fn default_capacity_max_age() -> u64 {
    60 * 60
}

fn default_reap_interval() -> u64 {
    60 * 60
}

fn default_reap_grace() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_metrics_port() -> u16 {
    9201
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            allocated_bytes: default_allocated_bytes(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            max_rpc_body_bytes: default_max_rpc_body(),
        }
    }
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            max_offers: default_max_offers(),
            blacklist: Vec::new(),
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            announce: true,
            announce_interval_secs: default_announce_interval(),
            max_age_secs: default_capacity_max_age(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reap_interval(),
            grace_ms: default_reap_grace(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            identity_path: default_identity_path(),
            storage: StorageConfig::default(),
            contracts_path: default_contracts_path(),
            transfer: TransferConfig::default(),
            offers: OfferConfig::default(),
            claims: Vec::new(),
            capacity: CapacityConfig::default(),
            reaper: ReaperConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig =
            toml::from_str(&contents).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(NodeError::Config("hostname must not be empty".to_string()));
        }
        if self.storage.allocated_bytes == 0 {
            return Err(NodeError::Config(
                "storage.allocated_bytes must be > 0".to_string(),
            ));
        }
        if self.transfer.token_ttl_secs == 0 {
            return Err(NodeError::Config(
                "transfer.token_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.offers.max_offers == 0 {
            return Err(NodeError::Config(
                "offers.max_offers must be > 0".to_string(),
            ));
        }
        if self.claims.iter().any(|entry| entry.is_empty()) {
            return Err(NodeError::Config(
                "claims entries must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
