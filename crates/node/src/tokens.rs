//! Transfer authorization tokens.
//!
//! A token authorizes exactly one HTTP shard transfer for a specific
//! `(hash, counterparty)` pair. Records expire after the configured TTL
//! regardless of the sweep; `authorize` checks expiry itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::RngCore;
use thiserror::Error;

use silo_protocol::Contact;

const TOKEN_BYTES: usize = 32;

/// Why an authorization was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token not found")]
    Missing,

    #[error("token expired")]
    Expired,

    #[error("token does not authorize this shard")]
    HashMismatch,
}

/// One outstanding transfer authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub hash: String,
    pub contact: Contact,
    pub expires_at: Instant,
}

/// Mint a fresh 32-byte token, hex encoded.
pub fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Table of outstanding transfer tokens.
pub struct TokenTable {
    records: HashMap<String, TokenRecord>,
    ttl: Duration,
}

impl TokenTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            ttl,
        }
    }

    /// Record an authorization for `(token, hash, contact)`.
    pub fn accept(&mut self, token: &str, hash: &str, contact: Contact) {
        self.records.insert(
            token.to_string(),
            TokenRecord {
                hash: hash.to_string(),
                contact,
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::debug!(hash = %hash, outstanding = self.records.len(), "Transfer token accepted");
    }

    /// Remove an authorization.
    pub fn reject(&mut self, token: &str) {
        self.records.remove(token);
    }

    /// Authorize a transfer: the token must exist, be unexpired and cover
    /// the requested hash.
    pub fn authorize(&self, token: &str, hash: &str) -> Result<&TokenRecord, TokenError> {
        let record = self.records.get(token).ok_or(TokenError::Missing)?;
        if record.expires_at < Instant::now() {
            return Err(TokenError::Expired);
        }
        if record.hash != hash {
            return Err(TokenError::HashMismatch);
        }
        Ok(record)
    }

    /// Drop expired records. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at >= now);
        let removed = before - self.records.len();
        if removed > 0 {
            tracing::debug!(removed, outstanding = self.records.len(), "Token sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Configured token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_protocol::contact::AddressInfo;

    fn contact() -> Contact {
        Contact::new(
            "11".repeat(20).parse().unwrap(),
            AddressInfo {
                hostname: "127.0.0.1".to_string(),
                port: 4001,
                hd_key: Some("renter-xpub".to_string()),
                hd_index: Some(0),
            },
        )
    }

    #[test]
    fn test_mint_is_32_bytes_hex_and_unique() {
        let a = mint_token();
        let b = mint_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(hex::decode(&a).is_ok());
    }

    #[test]
    fn test_accept_then_authorize() {
        let mut table = TokenTable::new(Duration::from_secs(60));
        let token = mint_token();
        table.accept(&token, "shard-hash", contact());

        let record = table.authorize(&token, "shard-hash").unwrap();
        assert_eq!(record.hash, "shard-hash");
        assert_eq!(record.contact.hd_key(), Some("renter-xpub"));
    }

    #[test]
    fn test_authorize_unknown_token() {
        let table = TokenTable::new(Duration::from_secs(60));
        assert_eq!(
            table.authorize("nope", "shard-hash"),
            Err(TokenError::Missing)
        );
    }

    #[test]
    fn test_authorize_wrong_hash() {
        let mut table = TokenTable::new(Duration::from_secs(60));
        let token = mint_token();
        table.accept(&token, "shard-a", contact());
        assert_eq!(
            table.authorize(&token, "shard-b"),
            Err(TokenError::HashMismatch)
        );
    }

    #[test]
    fn test_expired_token_refused_before_sweep() {
        let mut table = TokenTable::new(Duration::ZERO);
        let token = mint_token();
        table.accept(&token, "shard-hash", contact());
        std::thread::sleep(Duration::from_millis(5));

        // Record is still in the table, but authorization must fail.
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.authorize(&token, "shard-hash"),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_reject_removes_record() {
        let mut table = TokenTable::new(Duration::from_secs(60));
        let token = mint_token();
        table.accept(&token, "shard-hash", contact());
        table.reject(&token);
        assert_eq!(
            table.authorize(&token, "shard-hash"),
            Err(TokenError::Missing)
        );
    }

    #[test]
    fn test_sweep_drops_only_expired() {
        let mut table = TokenTable::new(Duration::ZERO);
        let dead = mint_token();
        table.accept(&dead, "shard-a", contact());

        let mut live_table = TokenTable::new(Duration::from_secs(60));
        let live = mint_token();
        live_table.accept(&live, "shard-b", contact());
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(table.sweep(), 1);
        assert!(table.is_empty());
        assert_eq!(live_table.sweep(), 0);
        assert_eq!(live_table.len(), 1);
    }
}
