//! Node glue.
//!
//! A [`Node`] composes the shared state with an overlay client handle,
//! registers the verb handlers with the transport dispatcher, and exposes
//! the renter- and farmer-initiated client calls. `listen` starts the
//! transport server and the periodic services (token sweep, contract
//! reaper, capacity announcements); `shutdown` tears them down and ends
//! every open auction.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use silo_protocol::topics::{all_topic_codes, capacity_topic};
use silo_protocol::{Contact, Contract, ContractRole, Verb};

use crate::capacity::CapacityAnnouncement;
use crate::error::{NodeError, Result};
use crate::handlers::{AuditItem, AuditResult, RpcHandlers};
use crate::metrics;
use crate::offers::{offer_stream, OfferOptions, OfferStream};
use crate::overlay::{identify_service, Overlay};
use crate::server::ShardServer;
use crate::state::NodeState;

/// A running Silo peer.
pub struct Node {
    state: Arc<NodeState>,
    overlay: Arc<dyn Overlay>,
    handlers: Arc<RpcHandlers>,
    http: reqwest::Client,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(state: Arc<NodeState>, overlay: Arc<dyn Overlay>) -> Self {
        let handlers = Arc::new(RpcHandlers::new(state.clone(), overlay.clone()));
        Self {
            state,
            overlay,
            handlers,
            http: reqwest::Client::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn handlers(&self) -> &Arc<RpcHandlers> {
        &self.handlers
    }

    /// Bind the transport and start the periodic services. Returns the
    /// bound address.
    pub async fn listen(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.state.config.port)).await?;
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, node_id = %self.state.identity.node_id(), "Node listening");

        let server = Arc::new(ShardServer::new(self.state.clone(), self.handlers.clone()));
        let mut spawned = vec![tokio::spawn(async move {
            if let Err(e) = server.run(listener).await {
                tracing::error!("Transport server failed: {}", e);
            }
        })];

        spawned.push(self.spawn_token_sweep());
        spawned.push(self.spawn_reaper());
        if self.state.config.capacity.announce {
            spawned.push(self.spawn_capacity_service());
        }
        self.tasks
            .lock()
            .expect("task list lock")
            .extend(spawned);

        if self.state.config.metrics.enabled {
            metrics::start_metrics_server(self.state.config.metrics.port).await?;
        }

        Ok(addr)
    }

    fn spawn_token_sweep(&self) -> JoinHandle<()> {
        let tokens = self.state.tokens.clone();
        let ttl = Duration::from_secs(self.state.config.transfer.token_ttl_secs);
        tokio::spawn(async move {
            let mut ticker = interval(ttl);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tokens.lock().expect("token table lock").sweep();
            }
        })
    }

    fn spawn_reaper(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let every = Duration::from_secs(self.state.config.reaper.interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match reap_expired(&state).await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::info!(reaped, "Expired contracts reaped"),
                    Err(e) => tracing::error!("Contract reaping failed: {}", e),
                }
            }
        })
    }

    fn spawn_capacity_service(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        let overlay = self.overlay.clone();
        let every = Duration::from_secs(self.state.config.capacity.announce_interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = announce_capacity(&state, overlay.as_ref()).await {
                    tracing::warn!("Capacity announcement failed: {}", e);
                }
                state
                    .capacity
                    .lock()
                    .expect("capacity cache lock")
                    .compact();
            }
        })
    }

    /// Stop periodic services, end every open auction and flush stores.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().expect("task list lock").drain(..) {
            task.abort();
        }
        self.state
            .offers
            .lock()
            .expect("offer registry lock")
            .end_all();
        if let Err(e) = self.state.contracts.flush() {
            tracing::warn!("Contract store flush failed: {}", e);
        }
        tracing::info!("Node shut down");
    }

    // Renter-side client calls

    /// Sign and broadcast a descriptor, opening an auction for it.
    pub async fn publish_shard_descriptor(
        &self,
        mut contract: Contract,
        options: OfferOptions,
    ) -> Result<OfferStream> {
        contract.fill_party(ContractRole::Renter, &self.state.identity)?;
        contract.sign(ContractRole::Renter, &self.state.identity)?;
        if !contract.is_well_formed() {
            return Err(NodeError::InvalidDescriptor);
        }
        let hash = contract
            .data_hash()
            .expect("well-formed descriptor has a hash")
            .to_string();
        let topic = contract
            .descriptor_topic()
            .ok_or(NodeError::InvalidDescriptor)?;

        let (handle, stream) = offer_stream(hash, options, self.state.keys.clone());
        self.state
            .offers
            .lock()
            .expect("offer registry lock")
            .insert(handle);

        self.overlay.publish(&topic, contract.to_value()).await?;
        Ok(stream)
    }

    /// Send a farmer's completed offer for a published descriptor.
    pub async fn offer_shard_allocation(
        &self,
        peer: &Contact,
        descriptor: &Contract,
    ) -> Result<Contract> {
        let reply = self
            .overlay
            .request(peer, Verb::Offer, vec![descriptor.to_value()])
            .await?;
        let finalized = Self::descriptor_reply(&reply)?;
        if !finalized.is_complete() || !finalized.is_valid(self.state.keys.as_ref()) {
            return Err(NodeError::InvalidDescriptor);
        }
        self.persist_with(peer, &finalized)?;
        Ok(finalized)
    }

    /// Ask a farmer to renew an existing contract.
    pub async fn request_contract_renewal(
        &self,
        peer: &Contact,
        renewal: &Contract,
    ) -> Result<Contract> {
        let reply = self
            .overlay
            .request(peer, Verb::Renew, vec![renewal.to_value()])
            .await?;
        // The reply is [finalized_descriptor]; only the descriptor is
        // persisted.
        let finalized = Self::descriptor_reply(&reply)?;
        if !finalized.is_complete() || !finalized.is_valid(self.state.keys.as_ref()) {
            return Err(NodeError::InvalidDescriptor);
        }
        self.persist_with(peer, &finalized)?;
        Ok(finalized)
    }

    /// Request upload tokens for a batch of contracted shards.
    pub async fn authorize_consignment(
        &self,
        peer: &Contact,
        hashes: &[String],
    ) -> Result<Vec<String>> {
        self.token_requests(peer, Verb::Consign, hashes).await
    }

    /// Request download tokens for a batch of contracted shards.
    pub async fn authorize_retrieval(
        &self,
        peer: &Contact,
        hashes: &[String],
    ) -> Result<Vec<String>> {
        self.token_requests(peer, Verb::Retrieve, hashes).await
    }

    /// Ask a source farmer to push a shard to another farmer.
    pub async fn create_shard_mirror(
        &self,
        source: &Contact,
        hash: &str,
        token: &str,
        destination: &Contact,
    ) -> Result<String> {
        let params = vec![
            json!(hash),
            json!(token),
            serde_json::to_value(destination)?,
        ];
        let reply = self.overlay.request(source, Verb::Mirror, params).await?;
        reply
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NodeError::Mirror("reply carries no acknowledgement".to_string()))
    }

    /// Challenge a farmer over a batch of shards.
    pub async fn audit_remote_shards(
        &self,
        peer: &Contact,
        audits: &[AuditItem],
    ) -> Result<Vec<AuditResult>> {
        let params = audits
            .iter()
            .map(|item| serde_json::to_value(item).map_err(NodeError::from))
            .collect::<Result<Vec<Value>>>()?;
        let reply = self.overlay.request(peer, Verb::Audit, params).await?;
        reply
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(NodeError::from))
            .collect()
    }

    /// Claim announced capacity from a farmer directly.
    pub async fn claim_farmer_capacity(
        &self,
        peer: &Contact,
        mut descriptor: Contract,
    ) -> Result<(Contract, String)> {
        descriptor.fill_party(ContractRole::Renter, &self.state.identity)?;
        descriptor.sign(ContractRole::Renter, &self.state.identity)?;

        let reply = self
            .overlay
            .request(peer, Verb::Claim, vec![descriptor.to_value()])
            .await?;
        if reply.len() < 2 {
            return Err(NodeError::InvalidParams(
                "claim reply must carry descriptor and token".to_string(),
            ));
        }
        let mut finalized = Contract::from_value(&reply[0]);
        let token = reply[1]
            .as_str()
            .ok_or_else(|| NodeError::InvalidParams("claim reply token is not a string".to_string()))?
            .to_string();

        if !finalized.side_settled(ContractRole::Farmer, self.state.keys.as_ref()) {
            return Err(NodeError::InvalidDescriptor);
        }
        // Countersign over the farmer-finalized field values so the
        // persisted copy carries two signatures on the same bytes.
        finalized.sign(ContractRole::Renter, &self.state.identity)?;
        if !finalized.is_complete() || !finalized.is_valid(self.state.keys.as_ref()) {
            return Err(NodeError::InvalidDescriptor);
        }
        self.persist_with(peer, &finalized)?;
        Ok((finalized, token))
    }

    /// Fetch a peer's identify handshake.
    pub async fn identify(&self, url: &str) -> Result<Contact> {
        Ok(identify_service(&self.http, url).await?)
    }

    /// Fold a farmer's capacity announcement into the renter-side cache.
    pub fn ingest_capacity_announcement(&self, announcement: CapacityAnnouncement) {
        self.state
            .capacity
            .lock()
            .expect("capacity cache lock")
            .update(announcement);
    }

    async fn token_requests(
        &self,
        peer: &Contact,
        verb: Verb,
        hashes: &[String],
    ) -> Result<Vec<String>> {
        let mut tokens = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let reply = self.overlay.request(peer, verb, vec![json!(hash)]).await?;
            let token = reply
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| NodeError::InvalidParams("reply carries no token".to_string()))?;
            tokens.push(token.to_string());
        }
        Ok(tokens)
    }

    fn descriptor_reply(reply: &[Value]) -> Result<Contract> {
        let value = reply
            .first()
            .ok_or_else(|| NodeError::InvalidParams("reply carries no descriptor".to_string()))?;
        Ok(Contract::from_value(value))
    }

    fn persist_with(&self, peer: &Contact, contract: &Contract) -> Result<()> {
        let hash = contract.data_hash().ok_or(NodeError::InvalidDescriptor)?;
        let counterparty = peer
            .hd_key()
            .ok_or_else(|| NodeError::InvalidParams("peer carries no extended public key".to_string()))?;
        let key = Contract::store_key_for(hash, counterparty);
        self.state.contracts.put(&key, contract)?;
        Ok(())
    }
}

/// Publish this farmer's capacity on every descriptor-class topic.
async fn announce_capacity(state: &Arc<NodeState>, overlay: &dyn Overlay) -> Result<()> {
    let usage = state.shards.usage().await?;
    metrics::BYTES_AVAILABLE.set(usage.available as i64);
    let announcement = CapacityAnnouncement {
        capacity: usage,
        contact: state.contact(),
    };
    let payload = serde_json::to_value(&announcement)?;
    for code in all_topic_codes() {
        overlay
            .publish(&capacity_topic(&code), payload.clone())
            .await?;
    }
    Ok(())
}

/// Remove contracts whose validity window passed by the grace margin and
/// unlink shards no remaining contract references.
async fn reap_expired(state: &Arc<NodeState>) -> Result<usize> {
    let now = NodeState::now_ms();
    let grace = state.config.reaper.grace_ms;
    let mut reaped = 0usize;
    let mut touched_hashes = Vec::new();

    for (key, contract) in state.contracts.iter_all()? {
        let end = contract.store_end().unwrap_or(0);
        if now > end.saturating_add(grace) {
            state.contracts.remove(&key)?;
            reaped += 1;
            if let Some(hash) = contract.data_hash() {
                touched_hashes.push(hash.to_string());
            }
        }
    }

    for hash in touched_hashes {
        if state.contracts.contracts_for_hash(&hash)?.is_empty() {
            state.shards.unlink(&hash).await?;
        }
    }
    Ok(reaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::wallet::StaticWallet;
    use serde_json::json;
    use silo_protocol::contract::fields;
    use silo_protocol::hashing::content_hash;
    use silo_protocol::{DirectKeySource, Identity};

    fn state_in(dir: &std::path::Path) -> Arc<NodeState> {
        let mut config = NodeConfig::default();
        config.port = 0;
        config.storage.path = dir.join("shards");
        config.contracts_path = dir.join("contracts.db");
        config.reaper.grace_ms = 0;
        Arc::new(
            NodeState::new(
                config,
                Identity::generate(),
                Arc::new(DirectKeySource),
                Arc::new(StaticWallet::new(Some("addr".to_string()))),
            )
            .unwrap(),
        )
    }

    fn expired_contract(hash: &str) -> Contract {
        let mut c = Contract::draft();
        c.set(fields::DATA_HASH, json!(hash)).unwrap();
        c.set(fields::DATA_SIZE, json!(4u64)).unwrap();
        c.set(fields::STORE_BEGIN, json!(1u64)).unwrap();
        c.set(fields::STORE_END, json!(2u64)).unwrap();
        c
    }

    #[tokio::test]
    async fn test_reap_removes_expired_and_unlinks_orphan_shards() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        let data = b"dead";
        let hash = content_hash(data);
        let mut writer = state.shards.write_stream(&hash).await.unwrap();
        writer.write_chunk(data).await.unwrap();
        writer.commit().await.unwrap();

        let key = Contract::store_key_for(&hash, "renter-xpub");
        state.contracts.put(&key, &expired_contract(&hash)).unwrap();

        let reaped = reap_expired(&state).await.unwrap();
        assert_eq!(reaped, 1);
        assert!(state.contracts.get(&key).unwrap().is_none());
        assert!(!state.shards.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_reap_keeps_shard_with_live_contract() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());

        let data = b"live";
        let hash = content_hash(data);
        let mut writer = state.shards.write_stream(&hash).await.unwrap();
        writer.write_chunk(data).await.unwrap();
        writer.commit().await.unwrap();

        let mut live = expired_contract(&hash);
        live.set(fields::STORE_END, json!(u64::MAX)).unwrap();
        state
            .contracts
            .put(&Contract::store_key_for(&hash, "dead-renter"), &expired_contract(&hash))
            .unwrap();
        state
            .contracts
            .put(&Contract::store_key_for(&hash, "live-renter"), &live)
            .unwrap();

        let reaped = reap_expired(&state).await.unwrap();
        assert_eq!(reaped, 1);
        // One contract still references the shard.
        assert!(state.shards.exists(&hash).await.unwrap());
    }
}
