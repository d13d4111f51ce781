//! Node identities and signature key resolution.
//!
//! The node signs descriptors with an Ed25519 key; its identity hash is
//! RIPEMD160(SHA256(public key)). Resolution of a descriptor's
//! `(hd_key, hd_index)` pair to a verifying key is behind the [`KeySource`]
//! trait: hierarchical derivation lives in the external wallet, and the
//! bundled [`DirectKeySource`] reads the field as the already-derived
//! public key in hex.

use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::contact::NodeId;
use crate::hashing::rmd160_sha256;

/// Errors from key handling.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key encoding: {0}")]
    Encoding(String),

    #[error("invalid key file: expected 32 bytes")]
    InvalidKeyFile,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves the verifying key a descriptor signature checks against.
pub trait KeySource: Send + Sync {
    fn verifying_key(&self, hd_key: &str, hd_index: u32) -> Result<VerifyingKey, KeyError>;
}

/// Key source that treats `hd_key` as the derived Ed25519 public key, hex
/// encoded. The derivation index is accepted as-is; the wallet that minted
/// the descriptor already applied it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectKeySource;

impl KeySource for DirectKeySource {
    fn verifying_key(&self, hd_key: &str, _hd_index: u32) -> Result<VerifyingKey, KeyError> {
        let bytes = hex::decode(hd_key).map_err(|e| KeyError::Encoding(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::Encoding("public key must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&arr).map_err(|e| KeyError::Encoding(e.to_string()))
    }
}

/// Long-term node identity.
pub struct Identity {
    signing_key: SigningKey,
    hd_index: u32,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            hd_index: 0,
        }
    }

    pub fn from_signing_key(signing_key: SigningKey, hd_index: u32) -> Self {
        Self {
            signing_key,
            hd_index,
        }
    }

    /// Node identity hash.
    pub fn node_id(&self) -> NodeId {
        NodeId(rmd160_sha256(
            self.signing_key.verifying_key().as_bytes(),
        ))
    }

    /// Extended public key field value for descriptors signed by this node.
    pub fn hd_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Derivation index paired with [`Identity::hd_key`].
    pub fn hd_index(&self) -> u32 {
        self.hd_index
    }

    /// Detached signature over a message, hex encoded.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }

    /// Persist the secret key. Owner read/write only.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        use std::io::Write;
        #[cfg(unix)]
        let mut file = {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)?
        };
        #[cfg(not(unix))]
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&self.signing_key.to_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let bytes = std::fs::read(path)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidKeyFile)?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&arr), 0))
    }

    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        if path.exists() {
            let identity = Self::load(path)?;
            tracing::info!(node_id = %identity.node_id(), "Loaded identity from {:?}", path);
            Ok(identity)
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            tracing::info!(node_id = %identity.node_id(), "Generated new identity, saved to {:?}", path);
            Ok(identity)
        }
    }
}

/// Verify a hex-encoded detached signature against a verifying key.
pub fn verify_signature(key: &VerifyingKey, message: &[u8], signature_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(arr) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&arr)).is_ok()
}
