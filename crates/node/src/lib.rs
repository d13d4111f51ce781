//! Silo peer node
//!
//! The protocol and storage state machine of a single node: verb
//! handlers for contract negotiation and shard lifecycle, the HTTP shard
//! transfer server with its token table, the offer-arbitration subsystem,
//! and the glue that wires them to an overlay client handle.

pub mod capacity;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod node;
pub mod offers;
pub mod overlay;
pub mod server;
pub mod state;
pub mod tokens;
pub mod wallet;

pub use capacity::{CapacityAnnouncement, CapacityCache, FarmerCapacity};
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use handlers::{AuditItem, AuditResult, RpcHandlers};
pub use node::Node;
pub use offers::{Offer, OfferError, OfferOptions, OfferRegistry, OfferStream, OfferStreamHandle};
pub use overlay::{HttpOverlay, Overlay, OverlayError};
pub use server::ShardServer;
pub use state::{NodeEvent, NodeState};
pub use tokens::{mint_token, TokenError, TokenRecord, TokenTable};
pub use wallet::{StaticWallet, Wallet, WalletError};
