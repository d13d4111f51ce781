//! Overlay transport client.
//!
//! Routing and pub/sub belong to the overlay layer; the node only needs
//! a handle that can send verbs to a contact, ping a contact, and
//! publish descriptor broadcasts. [`HttpOverlay`] is the direct
//! implementation: it posts RPC envelopes to the peer's `/rpc/` endpoint
//! and treats the identify handshake as liveness.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use silo_protocol::{Contact, RpcRequest, RpcResponse, Verb};

/// Transport-level RPC deadline. A handler that outlives it is abandoned
/// by the caller; its late reply is dropped on the floor.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Overlay transport errors.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Peer replied with an RPC error.
    #[error("{0}")]
    Remote(String),

    /// Envelope could not be encoded or decoded.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Handle to the overlay network.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Send a verb to a peer and await the positional reply.
    async fn request(
        &self,
        peer: &Contact,
        verb: Verb,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, OverlayError>;

    /// Reachability check against a contact.
    async fn ping(&self, peer: &Contact) -> Result<(), OverlayError>;

    /// Broadcast a payload on a pub/sub topic.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), OverlayError>;
}

/// Direct HTTP overlay client.
pub struct HttpOverlay {
    client: reqwest::Client,
    local: Contact,
}

impl HttpOverlay {
    pub fn new(local: Contact) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .expect("HTTP client initializes");
        Self { client, local }
    }

    fn next_request_id() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl Overlay for HttpOverlay {
    async fn request(
        &self,
        peer: &Contact,
        verb: Verb,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, OverlayError> {
        let envelope = RpcRequest {
            id: Self::next_request_id(),
            method: verb,
            params,
            contact: self.local.clone(),
        };
        let url = format!("{}/rpc/", peer.base_url());
        tracing::debug!(peer = %peer, verb = %verb, "Overlay request");

        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| OverlayError::Unreachable(e.to_string()))?;
        let reply: RpcResponse = response
            .json()
            .await
            .map_err(|e| OverlayError::Transport(e.to_string()))?;

        if let Some(error) = reply.error {
            return Err(OverlayError::Remote(error.message));
        }
        reply
            .result
            .ok_or_else(|| OverlayError::Transport("reply carries no result".to_string()))
    }

    async fn ping(&self, peer: &Contact) -> Result<(), OverlayError> {
        self.client
            .get(peer.base_url())
            .send()
            .await
            .map_err(|e| OverlayError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| OverlayError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, topic: &str, _payload: Value) -> Result<(), OverlayError> {
        // Topic fan-out belongs to the external pub/sub layer; the direct
        // client has no broadcast peers.
        tracing::debug!(topic = %topic, "No pub/sub layer attached, publish is local-only");
        Ok(())
    }
}

/// Fetch a peer's identify handshake: `GET /` returns
/// `[identity_hex, contact]`.
pub async fn identify_service(
    client: &reqwest::Client,
    url: &str,
) -> Result<Contact, OverlayError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| OverlayError::Unreachable(e.to_string()))?;
    let contact: Contact = response
        .json()
        .await
        .map_err(|e| OverlayError::Transport(e.to_string()))?;
    Ok(contact)
}
