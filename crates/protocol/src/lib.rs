//! Silo protocol primitives
//!
//! Shared vocabulary for every Silo node role: storage descriptors
//! (contracts), peer contacts, node identities, pub/sub topic codes and the
//! overlay RPC envelope. Hashing follows the network convention of
//! RIPEMD160 over SHA256 for content addresses and identity hashes.

pub mod contact;
pub mod contract;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod rpc;
pub mod topics;

pub use contact::{AddressInfo, Contact, NodeId};
pub use contract::{Contract, ContractRole, FieldKind, FieldSpec, CONTRACT_VERSION, FIELD_CATALOG};
pub use error::{ProtocolError, Result};
pub use keys::{DirectKeySource, Identity, KeyError, KeySource};
pub use rpc::{RpcError, RpcRequest, RpcResponse, Verb};
