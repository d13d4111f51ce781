//! Offer auctions.
//!
//! Publishing a descriptor opens a bounded auction for its shard hash.
//! Farmer offers arrive through the OFFER handler, pass the admission
//! policy, and are exposed to the owning renter in FIFO order as a lazy
//! sequence. The renter decides each offer; the decision travels back
//! over the offer's reply handle and becomes the transport reply to the
//! farmer. Hitting the acceptance budget ends the auction and rejects
//! everything still queued.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use silo_protocol::{Contact, Contract, ContractRole, KeySource};

/// Queue slack beyond the acceptance budget.
const QUEUE_HEADROOM: usize = 16;

/// Why an offer was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfferError {
    #[error("Descriptor does not match published shard")]
    HashMismatch,

    #[error("Invalid shard descriptor")]
    InvalidDescriptor,

    #[error("Farmer is blacklisted")]
    Blacklisted,

    #[error("Offers for descriptor are closed")]
    Closed,
}

/// Options for a published descriptor's auction.
#[derive(Debug, Clone)]
pub struct OfferOptions {
    /// How many offers the renter will accept before the auction ends.
    pub max_offers: usize,

    /// Farmer identities never admitted.
    pub blacklist: HashSet<String>,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            max_offers: 12,
            blacklist: HashSet::new(),
        }
    }
}

struct OfferState {
    resolved: usize,
    ended: bool,
}

struct OfferShared {
    data_hash: String,
    max_offers: usize,
    blacklist: HashSet<String>,
    keys: Arc<dyn KeySource>,
    state: Mutex<OfferState>,
}

impl OfferShared {
    fn is_ended(&self) -> bool {
        self.state.lock().expect("offer state lock").ended
    }
}

/// An admitted offer awaiting the renter's decision.
pub struct Offer {
    pub contact: Contact,
    pub contract: Contract,
    reply: oneshot::Sender<Result<Contract, OfferError>>,
    shared: Arc<OfferShared>,
}

impl Offer {
    /// Accept the offer, sending the finalized contract back to the
    /// farmer. Counts toward the acceptance budget; reaching it ends the
    /// auction.
    pub fn accept(self, finalized: Contract) {
        {
            let mut state = self.shared.state.lock().expect("offer state lock");
            state.resolved += 1;
            if state.resolved >= self.shared.max_offers {
                state.ended = true;
            }
        }
        let _ = self.reply.send(Ok(finalized));
    }

    /// Decline the offer with a reason.
    pub fn reject(self, reason: OfferError) {
        let _ = self.reply.send(Err(reason));
    }
}

/// Producer half: the OFFER handler queues through this; the registry
/// holds a clone per published descriptor.
#[derive(Clone)]
pub struct OfferStreamHandle {
    tx: mpsc::Sender<Offer>,
    shared: Arc<OfferShared>,
}

impl OfferStreamHandle {
    /// Apply the admission policy and enqueue. The returned receiver
    /// resolves with the renter's decision; on a policy violation it
    /// resolves immediately with the error.
    pub fn queue(
        &self,
        contact: Contact,
        contract: Contract,
    ) -> oneshot::Receiver<Result<Contract, OfferError>> {
        let (reply, decision) = oneshot::channel();

        if let Err(reason) = self.admit(&contact, &contract) {
            tracing::debug!(
                hash = %self.shared.data_hash,
                farmer = %contact.identity,
                reason = %reason,
                "Offer rejected"
            );
            let _ = reply.send(Err(reason));
            return decision;
        }

        let offer = Offer {
            contact,
            contract,
            reply,
            shared: self.shared.clone(),
        };
        if let Err(mpsc::error::TrySendError::Full(offer) | mpsc::error::TrySendError::Closed(offer)) =
            self.tx.try_send(offer)
        {
            let _ = offer.reply.send(Err(OfferError::Closed));
        }
        decision
    }

    fn admit(&self, contact: &Contact, contract: &Contract) -> Result<(), OfferError> {
        if contract.data_hash() != Some(self.shared.data_hash.as_str()) {
            return Err(OfferError::HashMismatch);
        }
        if !contract.side_settled(ContractRole::Farmer, self.shared.keys.as_ref()) {
            return Err(OfferError::InvalidDescriptor);
        }
        if self.shared.blacklist.contains(&contact.identity.to_string()) {
            return Err(OfferError::Blacklisted);
        }
        let state = self.shared.state.lock().expect("offer state lock");
        if state.ended || state.resolved >= self.shared.max_offers {
            return Err(OfferError::Closed);
        }
        Ok(())
    }

    /// Shard hash this auction covers.
    pub fn data_hash(&self) -> &str {
        &self.shared.data_hash
    }

    /// Whether the auction has terminated.
    pub fn is_ended(&self) -> bool {
        self.shared.is_ended()
    }

    /// Terminate the auction; queued and future offers are rejected.
    pub fn end(&self) {
        self.shared.state.lock().expect("offer state lock").ended = true;
    }
}

/// Consumer half, owned by the renter.
pub struct OfferStream {
    rx: mpsc::Receiver<Offer>,
    shared: Arc<OfferShared>,
}

impl OfferStream {
    /// Next admitted offer, FIFO. Returns None once the auction has
    /// ended; anything still queued at that point is rejected.
    pub async fn next(&mut self) -> Option<Offer> {
        loop {
            if self.shared.is_ended() {
                while let Ok(stale) = self.rx.try_recv() {
                    stale.reject(OfferError::Closed);
                }
                return None;
            }
            match self.rx.recv().await {
                Some(offer) => {
                    // The auction may have ended while this offer sat in
                    // the queue.
                    if self.shared.is_ended() {
                        offer.reject(OfferError::Closed);
                        continue;
                    }
                    return Some(offer);
                }
                None => return None,
            }
        }
    }

    /// Terminate the auction from the consumer side.
    pub fn end(&self) {
        self.shared.state.lock().expect("offer state lock").ended = true;
    }

    pub fn data_hash(&self) -> &str {
        &self.shared.data_hash
    }
}

/// Open an auction for a descriptor.
pub fn offer_stream(
    data_hash: String,
    options: OfferOptions,
    keys: Arc<dyn KeySource>,
) -> (OfferStreamHandle, OfferStream) {
    let shared = Arc::new(OfferShared {
        data_hash,
        max_offers: options.max_offers,
        blacklist: options.blacklist,
        keys,
        state: Mutex::new(OfferState {
            resolved: 0,
            ended: false,
        }),
    });
    let (tx, rx) = mpsc::channel(options.max_offers + QUEUE_HEADROOM);
    (
        OfferStreamHandle {
            tx,
            shared: shared.clone(),
        },
        OfferStream { rx, shared },
    )
}

/// Registry of active auctions, keyed by shard hash.
#[derive(Default)]
pub struct OfferRegistry {
    streams: HashMap<String, OfferStreamHandle>,
}

impl OfferRegistry {
    pub fn insert(&mut self, handle: OfferStreamHandle) {
        self.streams.insert(handle.data_hash().to_string(), handle);
    }

    /// Live handle for a shard hash. Ended auctions are pruned on lookup,
    /// which keeps the registry in step with terminal stream events.
    pub fn get(&mut self, hash: &str) -> Option<OfferStreamHandle> {
        if let Some(handle) = self.streams.get(hash) {
            if handle.is_ended() {
                self.streams.remove(hash);
                return None;
            }
            return Some(handle.clone());
        }
        None
    }

    /// Remove and terminate an auction.
    pub fn remove(&mut self, hash: &str) {
        if let Some(handle) = self.streams.remove(hash) {
            handle.end();
        }
    }

    /// Terminate and drop every auction, for shutdown.
    pub fn end_all(&mut self) {
        for (_, handle) in self.streams.drain() {
            handle.end();
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
