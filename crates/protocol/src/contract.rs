//! Storage contract descriptors.
//!
//! A contract is an open-schema mapping from a fixed catalog of field
//! names to scalar values, signed by both parties. The catalog drives
//! construction, validation and diffing; unknown fields never enter a
//! descriptor. Signatures cover the canonical serialization with both
//! signature fields blanked, so the two parties must sign the same final
//! field values for a descriptor to verify on both sides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::hashing::is_content_hash;
use crate::keys::{verify_signature, Identity, KeySource};
use crate::topics;

/// Current descriptor schema version.
pub const CONTRACT_VERSION: u64 = 1;

/// Descriptor field names.
pub mod fields {
    pub const VERSION: &str = "version";
    pub const RENTER_ID: &str = "renter_id";
    pub const RENTER_HD_KEY: &str = "renter_hd_key";
    pub const RENTER_HD_INDEX: &str = "renter_hd_index";
    pub const RENTER_SIGNATURE: &str = "renter_signature";
    pub const FARMER_ID: &str = "farmer_id";
    pub const FARMER_HD_KEY: &str = "farmer_hd_key";
    pub const FARMER_HD_INDEX: &str = "farmer_hd_index";
    pub const FARMER_SIGNATURE: &str = "farmer_signature";
    pub const DATA_SIZE: &str = "data_size";
    pub const DATA_HASH: &str = "data_hash";
    pub const STORE_BEGIN: &str = "store_begin";
    pub const STORE_END: &str = "store_end";
    pub const AUDIT_LEAVES: &str = "audit_leaves";
    pub const PAYMENT_DESTINATION: &str = "payment_destination";
}

/// Value shape of a catalog field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Schema version, unsigned integer.
    Version,
    /// 40-char hex node identity.
    Identity,
    /// Extended public key string.
    HdKey,
    /// Non-hardened derivation index.
    HdIndex,
    /// Detached signature, hex; empty until signed.
    Signature,
    /// Byte count.
    Size,
    /// 40-char lowercase hex content address.
    Hash,
    /// Unix-millisecond timestamp.
    Millis,
    /// Ordered list of 40-char hex Merkle leaves.
    LeafList,
    /// Opaque wallet address.
    Destination,
}

/// One entry of the descriptor field catalog.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Party-side fields stay null until that party fills them in.
    pub nullable: bool,
}

/// The full descriptor schema, in canonical order.
pub const FIELD_CATALOG: &[FieldSpec] = &[
    FieldSpec { name: fields::VERSION, kind: FieldKind::Version, nullable: false },
    FieldSpec { name: fields::RENTER_ID, kind: FieldKind::Identity, nullable: true },
    FieldSpec { name: fields::RENTER_HD_KEY, kind: FieldKind::HdKey, nullable: true },
    FieldSpec { name: fields::RENTER_HD_INDEX, kind: FieldKind::HdIndex, nullable: true },
    FieldSpec { name: fields::RENTER_SIGNATURE, kind: FieldKind::Signature, nullable: true },
    FieldSpec { name: fields::FARMER_ID, kind: FieldKind::Identity, nullable: true },
    FieldSpec { name: fields::FARMER_HD_KEY, kind: FieldKind::HdKey, nullable: true },
    FieldSpec { name: fields::FARMER_HD_INDEX, kind: FieldKind::HdIndex, nullable: true },
    FieldSpec { name: fields::FARMER_SIGNATURE, kind: FieldKind::Signature, nullable: true },
    FieldSpec { name: fields::DATA_SIZE, kind: FieldKind::Size, nullable: false },
    FieldSpec { name: fields::DATA_HASH, kind: FieldKind::Hash, nullable: false },
    FieldSpec { name: fields::STORE_BEGIN, kind: FieldKind::Millis, nullable: false },
    FieldSpec { name: fields::STORE_END, kind: FieldKind::Millis, nullable: false },
    FieldSpec { name: fields::AUDIT_LEAVES, kind: FieldKind::LeafList, nullable: false },
    FieldSpec { name: fields::PAYMENT_DESTINATION, kind: FieldKind::Destination, nullable: true },
];

/// The two contract parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractRole {
    Renter,
    Farmer,
}

impl ContractRole {
    fn id_field(&self) -> &'static str {
        match self {
            ContractRole::Renter => fields::RENTER_ID,
            ContractRole::Farmer => fields::FARMER_ID,
        }
    }

    fn hd_key_field(&self) -> &'static str {
        match self {
            ContractRole::Renter => fields::RENTER_HD_KEY,
            ContractRole::Farmer => fields::FARMER_HD_KEY,
        }
    }

    fn hd_index_field(&self) -> &'static str {
        match self {
            ContractRole::Renter => fields::RENTER_HD_INDEX,
            ContractRole::Farmer => fields::FARMER_HD_INDEX,
        }
    }

    fn signature_field(&self) -> &'static str {
        match self {
            ContractRole::Renter => fields::RENTER_SIGNATURE,
            ContractRole::Farmer => fields::FARMER_SIGNATURE,
        }
    }
}

/// A storage contract descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contract {
    fields: BTreeMap<String, Value>,
}

impl Contract {
    /// Empty draft at the current schema version. Party fields start null.
    pub fn draft() -> Self {
        let mut fields = BTreeMap::new();
        for spec in FIELD_CATALOG {
            fields.insert(spec.name.to_string(), Value::Null);
        }
        fields.insert(fields::VERSION.to_string(), Value::from(CONTRACT_VERSION));
        fields.insert(fields::RENTER_SIGNATURE.to_string(), Value::from(""));
        fields.insert(fields::FARMER_SIGNATURE.to_string(), Value::from(""));
        Self { fields }
    }

    /// Build a descriptor from an arbitrary JSON value.
    ///
    /// Never fails: unknown fields are dropped, missing catalog fields are
    /// normalized to null, and a non-object input yields a descriptor that
    /// reports not well-formed.
    pub fn from_value(value: &Value) -> Self {
        let mut contract = Self::draft();
        if let Value::Object(map) = value {
            for spec in FIELD_CATALOG {
                if let Some(v) = map.get(spec.name) {
                    contract.fields.insert(spec.name.to_string(), v.clone());
                }
            }
        }
        contract
    }

    /// Raw field access.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a catalog field, checking the value against its kind.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ProtocolError> {
        let spec = FIELD_CATALOG
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))?;
        if !kind_ok(spec, &value) {
            return Err(ProtocolError::InvalidFieldValue { field: spec.name });
        }
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    fn get_u64(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(Value::as_u64)
    }

    fn get_nonempty_str(&self, name: &str) -> Option<&str> {
        self.get_str(name).filter(|s| !s.is_empty())
    }

    pub fn data_hash(&self) -> Option<&str> {
        self.get_nonempty_str(fields::DATA_HASH)
    }

    pub fn data_size(&self) -> Option<u64> {
        self.get_u64(fields::DATA_SIZE)
    }

    pub fn store_begin(&self) -> Option<u64> {
        self.get_u64(fields::STORE_BEGIN)
    }

    pub fn store_end(&self) -> Option<u64> {
        self.get_u64(fields::STORE_END)
    }

    pub fn hd_key(&self, role: ContractRole) -> Option<&str> {
        self.get_nonempty_str(role.hd_key_field())
    }

    pub fn hd_index(&self, role: ContractRole) -> Option<u64> {
        self.get_u64(role.hd_index_field())
    }

    pub fn signature(&self, role: ContractRole) -> Option<&str> {
        self.get_nonempty_str(role.signature_field())
    }

    pub fn payment_destination(&self) -> Option<&str> {
        self.get_nonempty_str(fields::PAYMENT_DESTINATION)
    }

    /// Audit leaves as hex strings, in published order.
    pub fn audit_leaves(&self) -> Vec<String> {
        self.fields
            .get(fields::AUDIT_LEAVES)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fill a party's identity fields from a node identity.
    pub fn fill_party(&mut self, role: ContractRole, identity: &Identity) -> Result<(), ProtocolError> {
        self.set(role.id_field(), Value::from(identity.node_id().to_string()))?;
        self.set(role.hd_key_field(), Value::from(identity.hd_key()))?;
        self.set(role.hd_index_field(), Value::from(identity.hd_index()))?;
        Ok(())
    }

    /// Canonical serialization for signing: every catalog field in sorted
    /// name order, both signature fields blanked.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut canonical = self.fields.clone();
        canonical.insert(fields::RENTER_SIGNATURE.to_string(), Value::from(""));
        canonical.insert(fields::FARMER_SIGNATURE.to_string(), Value::from(""));
        serde_json::to_vec(&canonical).expect("descriptor map serializes")
    }

    /// Sign the descriptor in the given role.
    pub fn sign(&mut self, role: ContractRole, identity: &Identity) -> Result<(), ProtocolError> {
        let signature = identity.sign(&self.signing_bytes());
        self.set(role.signature_field(), Value::from(signature))
    }

    /// Whether the given role's signature is populated and verifies
    /// against the key resolved from its hd fields.
    pub fn verify_role(&self, role: ContractRole, keys: &dyn KeySource) -> bool {
        let Some(signature) = self.signature(role) else {
            return false;
        };
        let (Some(hd_key), Some(hd_index)) = (self.hd_key(role), self.hd_index(role)) else {
            return false;
        };
        let Ok(key) = keys.verifying_key(hd_key, hd_index as u32) else {
            return false;
        };
        verify_signature(&key, &self.signing_bytes(), signature)
    }

    /// Whether a party's fields are filled: identity, hd key and index,
    /// plus the payment destination on the farmer side.
    pub fn party_filled(&self, role: ContractRole) -> bool {
        let base = self.get_nonempty_str(role.id_field()).is_some()
            && self.hd_key(role).is_some()
            && self.hd_index(role).is_some();
        match role {
            ContractRole::Renter => base,
            ContractRole::Farmer => base && self.payment_destination().is_some(),
        }
    }

    /// Schema validity: every catalog field present with the right type,
    /// plausible timestamps and a canonical content address.
    pub fn is_well_formed(&self) -> bool {
        for spec in FIELD_CATALOG {
            match self.fields.get(spec.name) {
                Some(value) if kind_ok(spec, value) => {}
                _ => return false,
            }
        }
        match (self.store_begin(), self.store_end()) {
            (Some(begin), Some(end)) if end > begin => {}
            _ => return false,
        }
        self.data_hash().map(is_content_hash).unwrap_or(false)
    }

    /// Full validity: well-formed, and every populated signature verifies.
    pub fn is_valid(&self, keys: &dyn KeySource) -> bool {
        if !self.is_well_formed() {
            return false;
        }
        for role in [ContractRole::Renter, ContractRole::Farmer] {
            if self.signature(role).is_some() && !self.verify_role(role, keys) {
                return false;
            }
        }
        true
    }

    /// Both signatures present.
    pub fn is_complete(&self) -> bool {
        self.signature(ContractRole::Renter).is_some()
            && self.signature(ContractRole::Farmer).is_some()
    }

    /// One party's side settled: fields filled and its signature verifies.
    /// OFFER admission checks the farmer side; CLAIM checks the renter side.
    pub fn side_settled(&self, role: ContractRole, keys: &dyn KeySource) -> bool {
        self.is_well_formed() && self.party_filled(role) && self.verify_role(role, keys)
    }

    /// Field names whose values differ between two descriptors, in
    /// catalog order. Comparison is by deep value equality.
    pub fn diff(a: &Contract, b: &Contract) -> Vec<&'static str> {
        FIELD_CATALOG
            .iter()
            .filter(|spec| a.fields.get(spec.name) != b.fields.get(spec.name))
            .map(|spec| spec.name)
            .collect()
    }

    /// Key this contract persists under for a given counterparty.
    pub fn store_key_for(hash: &str, counterparty_hd_key: &str) -> String {
        format!("{hash}:{counterparty_hd_key}")
    }

    /// 4-character hex class code from size and duration buckets.
    pub fn topic_code(&self) -> Option<String> {
        let size = self.data_size()?;
        let begin = self.store_begin()?;
        let end = self.store_end()?;
        let duration = end.checked_sub(begin)?;
        Some(topics::topic_code(size, duration))
    }

    /// Pub/sub subject this descriptor is published on.
    pub fn descriptor_topic(&self) -> Option<String> {
        self.topic_code().map(|code| topics::descriptor_topic(&code))
    }

    /// Underlying field map as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.fields).expect("descriptor map serializes")
    }
}

fn kind_ok(spec: &FieldSpec, value: &Value) -> bool {
    if value.is_null() {
        return spec.nullable;
    }
    match spec.kind {
        FieldKind::Version | FieldKind::Size | FieldKind::Millis => value.is_u64(),
        FieldKind::HdIndex => value.as_u64().map(|i| i < (1 << 31)).unwrap_or(false),
        FieldKind::Identity => value
            .as_str()
            .map(|s| s.is_empty() || is_content_hash(s))
            .unwrap_or(false),
        FieldKind::Hash => value.as_str().is_some(),
        FieldKind::HdKey | FieldKind::Signature | FieldKind::Destination => value.is_string(),
        FieldKind::LeafList => value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .all(|v| v.as_str().map(is_content_hash).unwrap_or(false))
            })
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::content_hash;
    use crate::keys::DirectKeySource;
    use serde_json::json;

    fn renter() -> Identity {
        Identity::generate()
    }

    fn base_descriptor(renter: &Identity) -> Contract {
        let mut contract = Contract::draft();
        contract
            .set(fields::DATA_HASH, json!(content_hash(b"shard bytes")))
            .unwrap();
        contract.set(fields::DATA_SIZE, json!(11u64)).unwrap();
        contract.set(fields::STORE_BEGIN, json!(1_000u64)).unwrap();
        contract
            .set(fields::STORE_END, json!(90_000_000u64))
            .unwrap();
        contract
            .set(
                fields::AUDIT_LEAVES,
                json!([content_hash(b"leaf-0"), content_hash(b"leaf-1")]),
            )
            .unwrap();
        contract.fill_party(ContractRole::Renter, renter).unwrap();
        contract
    }

    fn settled_descriptor(renter: &Identity, farmer: &Identity) -> Contract {
        let mut contract = base_descriptor(renter);
        contract.fill_party(ContractRole::Farmer, farmer).unwrap();
        contract
            .set(fields::PAYMENT_DESTINATION, json!("pay-to-farmer"))
            .unwrap();
        contract.sign(ContractRole::Farmer, farmer).unwrap();
        contract.sign(ContractRole::Renter, renter).unwrap();
        contract
    }

    #[test]
    fn test_from_nonsense_never_panics_and_reports_invalid() {
        for nonsense in [
            json!(null),
            json!(42),
            json!("a string"),
            json!([1, 2, 3]),
            json!({"data_hash": 17, "unknown_field": true}),
        ] {
            let contract = Contract::from_value(&nonsense);
            assert!(!contract.is_well_formed());
            assert!(!contract.is_valid(&DirectKeySource));
        }
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let contract = Contract::from_value(&json!({"bogus": 1, "version": 1}));
        assert!(contract.get("bogus").is_none());
    }

    #[test]
    fn test_set_rejects_unknown_field_and_bad_kind() {
        let mut contract = Contract::draft();
        assert!(matches!(
            contract.set("not_a_field", json!(1)),
            Err(ProtocolError::UnknownField(_))
        ));
        assert!(matches!(
            contract.set(fields::DATA_SIZE, json!("large")),
            Err(ProtocolError::InvalidFieldValue { .. })
        ));
        assert!(matches!(
            contract.set(fields::AUDIT_LEAVES, json!(["short"])),
            Err(ProtocolError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_well_formed_requires_window_ordering() {
        let r = renter();
        let mut contract = base_descriptor(&r);
        assert!(contract.is_well_formed());

        contract.set(fields::STORE_END, json!(0u64)).unwrap();
        assert!(!contract.is_well_formed());
    }

    #[test]
    fn test_sign_and_verify_both_roles() {
        let r = renter();
        let f = Identity::generate();
        let contract = settled_descriptor(&r, &f);

        assert!(contract.is_complete());
        assert!(contract.is_valid(&DirectKeySource));
        assert!(contract.verify_role(ContractRole::Renter, &DirectKeySource));
        assert!(contract.verify_role(ContractRole::Farmer, &DirectKeySource));
    }

    #[test]
    fn test_mutation_after_signing_invalidates() {
        let r = renter();
        let f = Identity::generate();
        let mut contract = settled_descriptor(&r, &f);

        contract.set(fields::DATA_SIZE, json!(9_999u64)).unwrap();
        assert!(!contract.is_valid(&DirectKeySource));
    }

    #[test]
    fn test_signature_covers_blanked_signature_fields() {
        let r = renter();
        let f = Identity::generate();
        let mut contract = base_descriptor(&r);
        contract.fill_party(ContractRole::Farmer, &f).unwrap();
        contract
            .set(fields::PAYMENT_DESTINATION, json!("addr"))
            .unwrap();

        // Signing order must not matter: each signature covers the
        // descriptor with both signature fields blanked.
        contract.sign(ContractRole::Renter, &r).unwrap();
        contract.sign(ContractRole::Farmer, &f).unwrap();
        assert!(contract.verify_role(ContractRole::Renter, &DirectKeySource));
        assert!(contract.verify_role(ContractRole::Farmer, &DirectKeySource));
    }

    #[test]
    fn test_side_settled_farmer_only() {
        let r = renter();
        let f = Identity::generate();
        let mut contract = base_descriptor(&r);
        contract.fill_party(ContractRole::Farmer, &f).unwrap();
        contract
            .set(fields::PAYMENT_DESTINATION, json!("addr"))
            .unwrap();
        contract.sign(ContractRole::Farmer, &f).unwrap();

        assert!(contract.side_settled(ContractRole::Farmer, &DirectKeySource));
        assert!(!contract.is_complete());
    }

    #[test]
    fn test_diff_is_set_semantic_in_catalog_order() {
        let r = renter();
        let f = Identity::generate();
        let a = settled_descriptor(&r, &f);
        let mut b = a.clone();
        b.set(fields::STORE_END, json!(95_000_000u64)).unwrap();
        b.set(fields::FARMER_HD_KEY, json!("aa".repeat(32))).unwrap();

        let diff = Contract::diff(&a, &b);
        assert_eq!(diff, vec![fields::FARMER_HD_KEY, fields::STORE_END]);
        assert!(Contract::diff(&a, &a).is_empty());
    }

    #[test]
    fn test_store_key_format() {
        assert_eq!(Contract::store_key_for("abc", "xpub"), "abc:xpub");
    }

    #[test]
    fn test_topic_code_and_descriptor_topic() {
        let r = renter();
        let contract = base_descriptor(&r);
        let code = contract.topic_code().unwrap();
        assert_eq!(code.len(), 4);
        assert_eq!(contract.descriptor_topic().unwrap(), format!("0f{code}"));
    }

    #[test]
    fn test_serde_round_trip_preserves_fields() {
        let r = renter();
        let f = Identity::generate();
        let contract = settled_descriptor(&r, &f);
        let json = serde_json::to_value(&contract).unwrap();
        let back: Contract = serde_json::from_value(json).unwrap();
        assert_eq!(back, contract);
        assert!(back.is_valid(&DirectKeySource));
    }
}
