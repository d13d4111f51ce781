//! Error types for protocol primitives.

use thiserror::Error;

/// Errors raised while building or checking protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Field name is not part of the descriptor catalog.
    #[error("unknown descriptor field: {0}")]
    UnknownField(String),

    /// Field value does not match the catalog type.
    #[error("invalid value for descriptor field {field}")]
    InvalidFieldValue { field: &'static str },

    /// A hex-encoded value failed to decode.
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Key material errors.
    #[error("key error: {0}")]
    Key(#[from] crate::keys::KeyError),

    /// Contact parsing errors.
    #[error("malformed contact: {0}")]
    Contact(String),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
