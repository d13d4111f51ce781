//! Wallet integration.
//!
//! CLAIM mints a fresh payment destination for every contract. The
//! wallet RPC itself is an external collaborator; nodes without one run
//! the static implementation, which reuses a single configured address.

use async_trait::async_trait;
use thiserror::Error;

/// Wallet RPC errors.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet RPC failed: {0}")]
    Rpc(String),

    #[error("no payment address configured")]
    NotConfigured,
}

/// Mints payment destinations for farmer contracts.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn create_address(&self) -> Result<String, WalletError>;
}

/// Static single-address wallet.
pub struct StaticWallet {
    address: Option<String>,
}

impl StaticWallet {
    pub fn new(address: Option<String>) -> Self {
        Self { address }
    }
}

#[async_trait]
impl Wallet for StaticWallet {
    async fn create_address(&self) -> Result<String, WalletError> {
        self.address.clone().ok_or(WalletError::NotConfigured)
    }
}
