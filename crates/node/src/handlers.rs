//! Protocol verb handlers.
//!
//! One handler per verb, all operating on the shared [`NodeState`].
//! Handlers fail fast and surface errors verbatim as RPC error replies;
//! retry belongs to the calling renter. AUDIT is the one total verb: it
//! answers every batch item, encoding per-item failure as a null proof,
//! and walks the batch sequentially so concurrent proofs never contend
//! for the same disk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use silo_audit::{prove_reader, CompactProof};
use silo_protocol::contract::fields;
use silo_protocol::{Contact, Contract, ContractRole, RpcRequest, RpcResponse, Verb};

use crate::error::{NodeError, Result};
use crate::metrics;
use crate::overlay::Overlay;
use crate::state::NodeState;
use crate::tokens::mint_token;

/// Fields a renewal is allowed to change.
const RENEWAL_ALLOWED: &[&str] = &[
    fields::RENTER_ID,
    fields::RENTER_HD_KEY,
    fields::RENTER_SIGNATURE,
    fields::STORE_BEGIN,
    fields::STORE_END,
    fields::AUDIT_LEAVES,
];

/// One entry of an AUDIT batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditItem {
    pub hash: String,
    pub challenge: String,
}

/// One entry of an AUDIT reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub hash: String,
    pub proof: Option<CompactProof>,
}

/// The verb dispatcher.
pub struct RpcHandlers {
    state: Arc<NodeState>,
    overlay: Arc<dyn Overlay>,
    http: reqwest::Client,
}

impl RpcHandlers {
    pub fn new(state: Arc<NodeState>, overlay: Arc<dyn Overlay>) -> Self {
        Self {
            state,
            overlay,
            http: reqwest::Client::new(),
        }
    }

    /// Dispatch a request to its verb handler and shape the reply.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        tracing::debug!(verb = %request.method, from = %request.contact, "Dispatching RPC");

        let result = match request.method {
            Verb::Offer => self.handle_offer(&request).await,
            Verb::Claim => self.handle_claim(&request).await,
            Verb::Consign => self.handle_consign(&request).await,
            Verb::Retrieve => self.handle_retrieve(&request).await,
            Verb::Mirror => self.handle_mirror(&request).await,
            Verb::Audit => self.handle_audit(&request).await,
            Verb::Renew => self.handle_renew(&request).await,
            Verb::Probe => self.handle_probe(&request).await,
        };

        match result {
            Ok(values) => RpcResponse::success(id, values),
            Err(e) => {
                tracing::debug!(verb = %request.method, error = %e, "RPC handler failed");
                RpcResponse::failure(id, e.to_string())
            }
        }
    }

    fn descriptor_param(request: &RpcRequest) -> Result<Contract> {
        let value = request
            .params
            .first()
            .ok_or_else(|| NodeError::InvalidParams("missing descriptor".to_string()))?;
        Ok(Contract::from_value(value))
    }

    fn hash_param(request: &RpcRequest) -> Result<String> {
        request
            .params
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NodeError::InvalidParams("missing shard hash".to_string()))
    }

    fn counterparty_key(contact: &Contact) -> Result<String> {
        contact
            .hd_key()
            .map(str::to_string)
            .ok_or_else(|| NodeError::InvalidParams("contact carries no extended public key".to_string()))
    }

    /// Load the contract binding this shard to the calling counterparty.
    fn contract_for(&self, hash: &str, contact: &Contact) -> Result<Contract> {
        let key = Contract::store_key_for(hash, &Self::counterparty_key(contact)?);
        self.state
            .contracts
            .get(&key)?
            .ok_or(NodeError::ContractNotFound)
    }

    /// OFFER: a farmer answers a published descriptor.
    async fn handle_offer(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        let contract = Self::descriptor_param(request)?;
        if !contract.side_settled(ContractRole::Farmer, self.state.keys.as_ref()) {
            metrics::OFFERS_REJECTED_TOTAL.inc();
            return Err(NodeError::InvalidDescriptor);
        }
        let hash = contract
            .data_hash()
            .ok_or(NodeError::InvalidDescriptor)?
            .to_string();

        let handle = {
            let mut registry = self.state.offers.lock().expect("offer registry lock");
            registry.get(&hash).ok_or(NodeError::OffersClosed)?
        };

        let decision = handle.queue(request.contact.clone(), contract);
        metrics::OFFERS_QUEUED_TOTAL.inc();

        match decision.await {
            Ok(Ok(finalized)) => Ok(vec![finalized.to_value()]),
            Ok(Err(reason)) => {
                metrics::OFFERS_REJECTED_TOTAL.inc();
                Err(NodeError::OfferRejected(reason.to_string()))
            }
            // Reply handle dropped with the stream.
            Err(_) => Err(NodeError::OffersClosed),
        }
    }

    /// CLAIM: a renter buys previously announced capacity directly.
    async fn handle_claim(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        let mut contract = Self::descriptor_param(request)?;

        let claims = &self.state.config.claims;
        let wildcard = claims.iter().any(|entry| entry == "*");
        let renter_key = contract.hd_key(ContractRole::Renter).map(str::to_string);
        let allowed = wildcard
            || renter_key
                .as_deref()
                .map(|key| claims.iter().any(|entry| entry == key))
                .unwrap_or(false);
        if !allowed {
            return Err(NodeError::ClaimsRejected);
        }

        if !contract.side_settled(ContractRole::Renter, self.state.keys.as_ref()) {
            return Err(NodeError::InvalidDescriptor);
        }
        let hash = contract
            .data_hash()
            .ok_or(NodeError::InvalidDescriptor)?
            .to_string();

        contract.fill_party(ContractRole::Farmer, &self.state.identity)?;
        let destination = self.state.wallet.create_address().await?;
        contract.set(fields::PAYMENT_DESTINATION, json!(destination))?;
        contract.sign(ContractRole::Farmer, &self.state.identity)?;

        if !contract.is_well_formed()
            || !contract.is_complete()
            || !contract.verify_role(ContractRole::Farmer, self.state.keys.as_ref())
        {
            return Err(NodeError::InvalidDescriptor);
        }

        let renter_key = renter_key.expect("renter side settled");
        let key = Contract::store_key_for(&hash, &renter_key);
        self.state.contracts.put(&key, &contract)?;

        let token = mint_token();
        self.state
            .tokens
            .lock()
            .expect("token table lock")
            .accept(&token, &hash, request.contact.clone());
        metrics::TOKENS_ISSUED_TOTAL.inc();

        tracing::info!(hash = %hash, renter = %request.contact.identity, "Capacity claimed");
        Ok(vec![contract.to_value(), json!(token)])
    }

    /// CONSIGN: authorize an upload for a contracted shard.
    async fn handle_consign(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        let hash = Self::hash_param(request)?;
        let contract = self.contract_for(&hash, &request.contact)?;

        if NodeState::now_ms() > contract.store_end().unwrap_or(0) {
            return Err(NodeError::ContractExpired);
        }

        let token = mint_token();
        self.state
            .tokens
            .lock()
            .expect("token table lock")
            .accept(&token, &hash, request.contact.clone());
        metrics::TOKENS_ISSUED_TOTAL.inc();
        Ok(vec![json!(token)])
    }

    /// RETRIEVE: authorize a download for a contracted shard.
    async fn handle_retrieve(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        let hash = Self::hash_param(request)?;
        let _contract = self.contract_for(&hash, &request.contact)?;

        if !self.state.shards.exists(&hash).await? {
            return Err(NodeError::ShardNotFound);
        }

        let token = mint_token();
        self.state
            .tokens
            .lock()
            .expect("token table lock")
            .accept(&token, &hash, request.contact.clone());
        metrics::TOKENS_ISSUED_TOTAL.inc();
        Ok(vec![json!(token)])
    }

    /// MIRROR: push a held shard to another farmer.
    async fn handle_mirror(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        if request.params.len() < 3 {
            return Err(NodeError::InvalidParams(
                "expected [hash, token, destination]".to_string(),
            ));
        }
        let hash = request.params[0]
            .as_str()
            .ok_or_else(|| NodeError::InvalidParams("missing shard hash".to_string()))?;
        let token = request.params[1]
            .as_str()
            .ok_or_else(|| NodeError::InvalidParams("missing transfer token".to_string()))?;
        let destination: Contact = serde_json::from_value(request.params[2].clone())
            .map_err(|e| NodeError::InvalidParams(format!("bad destination contact: {e}")))?;

        let _contract = self.contract_for(hash, &request.contact)?;
        let file = match self.state.shards.read_stream(hash).await {
            Ok(file) => file,
            Err(silo_store::StoreError::ShardNotFound(_)) => return Err(NodeError::ShardNotFound),
            Err(e) => return Err(e.into()),
        };

        let url = format!("{}/shards/{}?token={}", destination.base_url(), hash, token);
        tracing::info!(hash = %hash, destination = %destination, "Mirroring shard");

        let response = self
            .http
            .post(&url)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| NodeError::Mirror(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(NodeError::Mirror(format!(
                "destination returned {}",
                response.status()
            )));
        }
        let ack = response
            .text()
            .await
            .map_err(|e| NodeError::Mirror(e.to_string()))?;
        Ok(vec![json!(ack)])
    }

    /// AUDIT: prove possession for each challenged shard, in order.
    ///
    /// Total by construction: missing contracts, missing shards and
    /// failed proofs all surface as a null proof, never as an RPC error.
    async fn handle_audit(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        let counterparty = request.contact.hd_key().map(str::to_string);
        let mut results = Vec::with_capacity(request.params.len());

        for raw in &request.params {
            let item: AuditItem = match serde_json::from_value(raw.clone()) {
                Ok(item) => item,
                Err(_) => {
                    let hash = raw
                        .get("hash")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    results.push(AuditResult { hash, proof: None });
                    metrics::AUDIT_FAILURE_TOTAL.inc();
                    continue;
                }
            };
            let proof = match &counterparty {
                Some(xpub) => self.prove_one(&item, xpub).await,
                None => None,
            };
            if proof.is_some() {
                metrics::AUDIT_SUCCESS_TOTAL.inc();
            } else {
                metrics::AUDIT_FAILURE_TOTAL.inc();
            }
            results.push(AuditResult {
                hash: item.hash,
                proof,
            });
        }

        results
            .into_iter()
            .map(|r| serde_json::to_value(r).map_err(NodeError::from))
            .collect()
    }

    async fn prove_one(&self, item: &AuditItem, counterparty: &str) -> Option<CompactProof> {
        let key = Contract::store_key_for(&item.hash, counterparty);
        let contract = self.state.contracts.get(&key).ok().flatten()?;
        let leaves = contract.audit_leaves();
        let file = self.state.shards.read_stream(&item.hash).await.ok()?;
        match prove_reader(&leaves, &item.challenge, file).await {
            Ok(proof) => Some(proof),
            Err(e) => {
                tracing::warn!(hash = %item.hash, error = %e, "Audit proof failed");
                None
            }
        }
    }

    /// RENEW: accept renter-side changes to an existing contract.
    async fn handle_renew(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        let mut renewal = Self::descriptor_param(request)?;
        if !renewal.side_settled(ContractRole::Renter, self.state.keys.as_ref()) {
            return Err(NodeError::InvalidDescriptor);
        }
        let hash = renewal
            .data_hash()
            .ok_or(NodeError::InvalidDescriptor)?
            .to_string();

        let counterparty = Self::counterparty_key(&request.contact)?;
        let key = Contract::store_key_for(&hash, &counterparty);
        let local = self
            .state
            .contracts
            .get(&key)?
            .ok_or(NodeError::ContractNotFound)?;

        let diff = Contract::diff(&local, &renewal);
        if let Some(field) = diff
            .iter()
            .find(|field| !RENEWAL_ALLOWED.contains(field))
        {
            return Err(NodeError::RenewalRejected(field.to_string()));
        }

        renewal.sign(ContractRole::Farmer, &self.state.identity)?;
        if !renewal.is_well_formed() || !renewal.is_complete() {
            return Err(NodeError::InvalidDescriptor);
        }

        // The renter may have rotated its key; the contract follows it.
        let new_counterparty = renewal
            .hd_key(ContractRole::Renter)
            .expect("renter side settled")
            .to_string();
        if new_counterparty != counterparty {
            self.state.contracts.remove(&key)?;
        }
        let new_key = Contract::store_key_for(&hash, &new_counterparty);
        self.state.contracts.put(&new_key, &renewal)?;

        tracing::info!(hash = %hash, "Contract renewed");
        Ok(vec![renewal.to_value()])
    }

    /// PROBE: reachability self-test relay.
    async fn handle_probe(&self, request: &RpcRequest) -> Result<Vec<Value>> {
        match self.overlay.ping(&request.contact).await {
            Ok(()) => Ok(vec![]),
            Err(_) => Err(NodeError::ProbeUnreachable),
        }
    }
}
