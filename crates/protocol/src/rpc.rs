//! Overlay RPC envelope.
//!
//! Every call carries the originator's contact; replies either carry a
//! positional result list or an error message. The transport posts these
//! envelopes as JSON to the peer's `/rpc/` endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contact::Contact;

/// Protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Offer,
    Claim,
    Consign,
    Retrieve,
    Mirror,
    Audit,
    Renew,
    Probe,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Offer => "OFFER",
            Verb::Claim => "CLAIM",
            Verb::Consign => "CONSIGN",
            Verb::Retrieve => "RETRIEVE",
            Verb::Mirror => "MIRROR",
            Verb::Audit => "AUDIT",
            Verb::Renew => "RENEW",
            Verb::Probe => "PROBE",
        }
    }

    pub fn parse(value: &str) -> Option<Verb> {
        match value {
            "OFFER" => Some(Verb::Offer),
            "CLAIM" => Some(Verb::Claim),
            "CONSIGN" => Some(Verb::Consign),
            "RETRIEVE" => Some(Verb::Retrieve),
            "MIRROR" => Some(Verb::Mirror),
            "AUDIT" => Some(Verb::Audit),
            "RENEW" => Some(Verb::Renew),
            "PROBE" => Some(Verb::Probe),
            _ => None,
        }
    }

    pub fn all() -> [Verb; 8] {
        [
            Verb::Offer,
            Verb::Claim,
            Verb::Consign,
            Verb::Retrieve,
            Verb::Mirror,
            Verb::Audit,
            Verb::Renew,
            Verb::Probe,
        ]
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An RPC call envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Request id, echoed in the reply.
    pub id: String,

    /// Protocol verb.
    pub method: Verb,

    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,

    /// Originating contact `[identity_hex, info]`.
    pub contact: Contact,
}

/// Error body of a failed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An RPC reply envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: String, result: Vec<Value>) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: String, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError::new(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::AddressInfo;
    use serde_json::json;

    fn contact() -> Contact {
        Contact::new(
            "00".repeat(20).parse().unwrap(),
            AddressInfo {
                hostname: "localhost".to_string(),
                port: 4001,
                hd_key: None,
                hd_index: None,
            },
        )
    }

    #[test]
    fn test_verb_round_trip() {
        for verb in Verb::all() {
            assert_eq!(Verb::parse(verb.as_str()), Some(verb));
        }
        assert_eq!(Verb::parse("STEAL"), None);
    }

    #[test]
    fn test_request_serialization() {
        let request = RpcRequest {
            id: "1".to_string(),
            method: Verb::Consign,
            params: vec![json!("aa".repeat(20))],
            contact: contact(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], json!("CONSIGN"));
        let back: RpcRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.method, Verb::Consign);
        assert_eq!(back.params.len(), 1);
    }

    #[test]
    fn test_response_shapes() {
        let ok = RpcResponse::success("7".to_string(), vec![json!("token")]);
        let text = serde_json::to_string(&ok).unwrap();
        assert!(!text.contains("error"));

        let err = RpcResponse::failure("7".to_string(), "Shard not found");
        let text = serde_json::to_string(&err).unwrap();
        assert!(text.contains("Shard not found"));
        assert!(!text.contains("result"));
    }
}
