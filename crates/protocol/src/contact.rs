//! Peer contacts.
//!
//! Every overlay call carries a contact envelope `[identity_hex, info]`.
//! The identity is the 20-byte node hash; the info record carries the
//! reachable address and, when the peer acts as a counterparty, its
//! extended public key.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// 20-byte node identity hash (RIPEMD160 of SHA256 of the public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| ProtocolError::Contact("identity must be 20 bytes".to_string()))?;
        Ok(NodeId(arr))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Reachability record for a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Hostname or IP address.
    pub hostname: String,

    /// Transport port.
    pub port: u16,

    /// Extended public key the peer signs contracts with, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_key: Option<String>,

    /// Derivation index paired with `hd_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_index: Option<u32>,
}

/// A peer contact: identity hash plus address info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub identity: NodeId,
    pub info: AddressInfo,
}

impl Contact {
    pub fn new(identity: NodeId, info: AddressInfo) -> Self {
        Self { identity, info }
    }

    /// Counterparty extended public key, when the address info carries one.
    pub fn hd_key(&self) -> Option<&str> {
        self.info.hd_key.as_deref()
    }

    /// Base HTTP URL of the peer's transport.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.info.hostname, self.info.port)
    }
}

// Contacts ride the wire as a 2-element tuple [identity_hex, info].
impl Serialize for Contact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.identity, &self.info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Contact {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (identity, info) = <(NodeId, AddressInfo)>::deserialize(deserializer)?;
        Ok(Contact { identity, info })
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.identity, self.info.hostname, self.info.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contact() -> Contact {
        Contact::new(
            "aabbccddeeff00112233445566778899aabbccdd".parse().unwrap(),
            AddressInfo {
                hostname: "127.0.0.1".to_string(),
                port: 4000,
                hd_key: Some("deadbeef".to_string()),
                hd_index: Some(12),
            },
        )
    }

    #[test]
    fn test_node_id_round_trip() {
        let id: NodeId = "aabbccddeeff00112233445566778899aabbccdd".parse().unwrap();
        assert_eq!(id.to_string(), "aabbccddeeff00112233445566778899aabbccdd");
    }

    #[test]
    fn test_node_id_rejects_wrong_length() {
        assert!("aabb".parse::<NodeId>().is_err());
        assert!("zz".repeat(20).parse::<NodeId>().is_err());
    }

    #[test]
    fn test_contact_serializes_as_tuple() {
        let contact = sample_contact();
        let json = serde_json::to_value(&contact).unwrap();
        assert!(json.is_array());
        assert_eq!(
            json[0],
            serde_json::json!("aabbccddeeff00112233445566778899aabbccdd")
        );
        assert_eq!(json[1]["hostname"], serde_json::json!("127.0.0.1"));

        let back: Contact = serde_json::from_value(json).unwrap();
        assert_eq!(back, contact);
    }

    #[test]
    fn test_contact_hd_key_accessor() {
        let contact = sample_contact();
        assert_eq!(contact.hd_key(), Some("deadbeef"));
        assert_eq!(contact.base_url(), "http://127.0.0.1:4000");
    }

    #[test]
    fn test_contact_without_hd_key_omits_field() {
        let mut contact = sample_contact();
        contact.info.hd_key = None;
        contact.info.hd_index = None;
        let json = serde_json::to_string(&contact).unwrap();
        assert!(!json.contains("hd_key"));
    }
}
