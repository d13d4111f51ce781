//! Persistence layer for Silo nodes.
//!
//! Two stores back a node: a sled key-value tree for contract
//! descriptors, keyed `"{data_hash}:{counterparty_hd_key}"`, and a
//! content-addressed filesystem store for shard bytes with streaming
//! reads and writes.

pub mod contracts;
pub mod shards;

pub use contracts::ContractStore;
pub use shards::{ShardStore, ShardWriter, StorageUsage};

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key or hash failed validation.
    #[error("invalid shard hash: {0}")]
    InvalidHash(String),

    /// Shard bytes are not present.
    #[error("shard not found: {0}")]
    ShardNotFound(String),

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    /// Descriptor (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
