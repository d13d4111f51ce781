//! Shared harness for node integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use silo_node::{NodeConfig, NodeState, Overlay, OverlayError, StaticWallet};
use silo_protocol::contract::fields;
use silo_protocol::{
    AddressInfo, Contact, Contract, ContractRole, DirectKeySource, Identity, Verb,
};

/// Overlay stub: records pings, can be told to fail them.
pub struct MockOverlay {
    pub ping_ok: bool,
    pub pings: Mutex<Vec<Contact>>,
}

impl MockOverlay {
    pub fn new(ping_ok: bool) -> Self {
        Self {
            ping_ok,
            pings: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Overlay for MockOverlay {
    async fn request(
        &self,
        _peer: &Contact,
        _verb: Verb,
        _params: Vec<Value>,
    ) -> Result<Vec<Value>, OverlayError> {
        Err(OverlayError::Unreachable("mock overlay".to_string()))
    }

    async fn ping(&self, peer: &Contact) -> Result<(), OverlayError> {
        self.pings.lock().unwrap().push(peer.clone());
        if self.ping_ok {
            Ok(())
        } else {
            Err(OverlayError::Unreachable("mock overlay".to_string()))
        }
    }

    async fn publish(&self, _topic: &str, _payload: Value) -> Result<(), OverlayError> {
        Ok(())
    }
}

/// Node state on temp storage. The tempdir must outlive the state.
pub fn test_state(claims: Vec<String>) -> (tempfile::TempDir, Arc<NodeState>) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = NodeConfig::default();
    config.port = 0;
    config.storage.path = dir.path().join("shards");
    config.contracts_path = dir.path().join("contracts.db");
    config.claims = claims;
    config.capacity.announce = false;

    let state = NodeState::new(
        config,
        Identity::generate(),
        Arc::new(DirectKeySource),
        Arc::new(StaticWallet::new(Some("farmer-payout-address".to_string()))),
    )
    .unwrap();
    (dir, Arc::new(state))
}

/// Contact envelope for an identity reachable at a port.
pub fn contact_for(identity: &Identity, port: u16) -> Contact {
    Contact::new(
        identity.node_id(),
        AddressInfo {
            hostname: "127.0.0.1".to_string(),
            port,
            hd_key: Some(identity.hd_key()),
            hd_index: Some(identity.hd_index()),
        },
    )
}

/// Descriptor with data fields filled and the renter side settled.
pub fn renter_descriptor(hash: &str, size: u64, leaves: &[String], renter: &Identity) -> Contract {
    let mut contract = Contract::draft();
    contract.set(fields::DATA_HASH, json!(hash)).unwrap();
    contract.set(fields::DATA_SIZE, json!(size)).unwrap();
    contract.set(fields::STORE_BEGIN, json!(1_000u64)).unwrap();
    contract
        .set(fields::STORE_END, json!(u64::MAX / 2))
        .unwrap();
    contract.set(fields::AUDIT_LEAVES, json!(leaves)).unwrap();
    contract.fill_party(ContractRole::Renter, renter).unwrap();
    contract.sign(ContractRole::Renter, renter).unwrap();
    contract
}

/// Descriptor settled on both sides, as stored after a negotiation.
pub fn settled_descriptor(
    hash: &str,
    size: u64,
    leaves: &[String],
    renter: &Identity,
    farmer: &Identity,
) -> Contract {
    let mut contract = renter_descriptor(hash, size, leaves, renter);
    contract.fill_party(ContractRole::Farmer, farmer).unwrap();
    contract
        .set(fields::PAYMENT_DESTINATION, json!("farmer-payout-address"))
        .unwrap();
    contract.sign(ContractRole::Farmer, farmer).unwrap();
    contract.sign(ContractRole::Renter, renter).unwrap();
    contract
}

/// Store shard bytes in the state's shard store.
pub async fn put_shard(state: &NodeState, data: &[u8]) -> String {
    let hash = silo_protocol::hashing::content_hash(data);
    let mut writer = state.shards.write_stream(&hash).await.unwrap();
    writer.write_chunk(data).await.unwrap();
    writer.commit().await.unwrap();
    hash
}
