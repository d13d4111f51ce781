//! Error types for node operations.
//!
//! Handler failures surface verbatim as RPC error replies, so the
//! protocol-visible variants render the exact wire strings.

use thiserror::Error;

/// Node error types.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Descriptor failed validation or completeness checks.
    #[error("Invalid shard descriptor")]
    InvalidDescriptor,

    /// No open offer stream for the descriptor's shard hash.
    #[error("Offers for descriptor are closed")]
    OffersClosed,

    /// An offer was turned away by the stream's admission policy.
    #[error("{0}")]
    OfferRejected(String),

    /// The contract's validity window has passed.
    #[error("Contract has expired")]
    ContractExpired,

    /// No contract under the computed store key.
    #[error("Contract not found")]
    ContractNotFound,

    /// Shard bytes are not held locally.
    #[error("Shard not found")]
    ShardNotFound,

    /// A renewal tried to change a farmer-owned field.
    #[error("Rejecting renewal of {0}")]
    RenewalRejected(String),

    /// Renter is not on the claims allow-list.
    #[error("Currently rejecting claims")]
    ClaimsRejected,

    /// PROBE could not reach the originating contact.
    #[error("Failed to reach probe originator")]
    ProbeUnreachable,

    /// Malformed RPC parameters.
    #[error("Invalid RPC parameters: {0}")]
    InvalidParams(String),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wallet RPC errors.
    #[error("Wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),

    /// Overlay transport errors.
    #[error("Overlay error: {0}")]
    Overlay(#[from] crate::overlay::OverlayError),

    /// Mirror push failures.
    #[error("Mirror failed: {0}")]
    Mirror(String),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] silo_protocol::ProtocolError),

    /// Persistence errors.
    #[error("Store error: {0}")]
    Store(#[from] silo_store::StoreError),

    /// Proof generation errors.
    #[error("Proof error: {0}")]
    Proof(#[from] silo_audit::ProofError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
