//! Shared node state.
//!
//! Everything the handlers and the shard server mutate hangs off one
//! [`NodeState`]. Mutable structures sit behind mutexes held only for
//! short, non-suspending sections, which serializes mutation the way the
//! protocol's single-actor model requires.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use silo_protocol::{AddressInfo, Contact, Identity, KeySource};
use silo_store::{ContractStore, ShardStore};

use crate::capacity::CapacityCache;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::offers::OfferRegistry;
use crate::tokens::TokenTable;
use crate::wallet::Wallet;

/// Events emitted by the shard server.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    ShardUploaded { hash: String },
    ShardDownloaded { hash: String },
}

/// Shared state of one node instance.
pub struct NodeState {
    pub config: NodeConfig,
    pub identity: Arc<Identity>,
    pub keys: Arc<dyn KeySource>,
    pub contracts: Arc<ContractStore>,
    pub shards: Arc<ShardStore>,
    pub tokens: Arc<Mutex<TokenTable>>,
    pub offers: Arc<Mutex<OfferRegistry>>,
    pub capacity: Arc<Mutex<CapacityCache>>,
    pub wallet: Arc<dyn Wallet>,
    pub events: broadcast::Sender<NodeEvent>,
}

impl NodeState {
    /// Assemble state from configuration and collaborators.
    pub fn new(
        config: NodeConfig,
        identity: Identity,
        keys: Arc<dyn KeySource>,
        wallet: Arc<dyn Wallet>,
    ) -> Result<Self> {
        config.validate()?;
        let contracts = Arc::new(ContractStore::open(&config.contracts_path)?);
        let shards = Arc::new(ShardStore::open(
            config.storage.path.clone(),
            config.storage.allocated_bytes,
        )?);
        let tokens = Arc::new(Mutex::new(TokenTable::new(Duration::from_secs(
            config.transfer.token_ttl_secs,
        ))));
        let capacity = Arc::new(Mutex::new(CapacityCache::new(Duration::from_secs(
            config.capacity.max_age_secs,
        ))));
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            config,
            identity: Arc::new(identity),
            keys,
            contracts,
            shards,
            tokens,
            offers: Arc::new(Mutex::new(OfferRegistry::default())),
            capacity,
            wallet,
            events,
        })
    }

    /// This node's contact envelope.
    pub fn contact(&self) -> Contact {
        Contact::new(
            self.identity.node_id(),
            AddressInfo {
                hostname: self.config.hostname.clone(),
                port: self.config.port,
                hd_key: Some(self.identity.hd_key()),
                hd_index: Some(self.identity.hd_index()),
            },
        )
    }

    /// Subscribe to shard transfer events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Current wall-clock time in unix milliseconds.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::StaticWallet;
    use silo_protocol::DirectKeySource;

    #[tokio::test]
    async fn test_state_assembly_and_contact() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.hostname = "node.example".to_string();
        config.port = 4321;
        config.storage.path = dir.path().join("shards");
        config.contracts_path = dir.path().join("contracts.db");

        let identity = Identity::generate();
        let expected_id = identity.node_id();
        let state = NodeState::new(
            config,
            identity,
            Arc::new(DirectKeySource),
            Arc::new(StaticWallet::new(Some("addr".to_string()))),
        )
        .unwrap();

        let contact = state.contact();
        assert_eq!(contact.identity, expected_id);
        assert_eq!(contact.info.hostname, "node.example");
        assert_eq!(contact.info.port, 4321);
        assert!(contact.hd_key().is_some());
    }

    #[test]
    fn test_now_ms_is_recent() {
        // Any time after 2020 is plausible for a running test.
        assert!(NodeState::now_ms() > 1_577_836_800_000);
    }
}
