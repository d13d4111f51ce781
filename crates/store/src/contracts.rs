//! Contract store.
//!
//! Descriptors persist in a sled tree keyed
//! `"{data_hash}:{counterparty_hd_key}"`, so a node holds at most one
//! contract per (shard, counterparty) pair. Lookups by hash alone scan
//! the key prefix.

use sled::{Db, Tree};
use std::path::Path;

use silo_protocol::Contract;

use crate::{Result, StoreError};

/// Key-value store of contract descriptors.
pub struct ContractStore {
    #[allow(dead_code)]
    db: Db,
    contracts: Tree,
}

impl ContractStore {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let contracts = db.open_tree("contracts")?;
        Ok(Self { db, contracts })
    }

    /// Persist a descriptor under its store key.
    pub fn put(&self, key: &str, contract: &Contract) -> Result<()> {
        let bytes = serde_json::to_vec(contract)?;
        self.contracts.insert(key.as_bytes(), bytes)?;
        tracing::debug!(key = %key, "Contract persisted");
        Ok(())
    }

    /// Fetch a descriptor by store key.
    pub fn get(&self, key: &str) -> Result<Option<Contract>> {
        match self.contracts.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a descriptor. Missing keys are not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.contracts.remove(key.as_bytes())?;
        Ok(())
    }

    /// First contract covering a shard hash, regardless of counterparty.
    pub fn find_by_hash(&self, hash: &str) -> Result<Option<(String, Contract)>> {
        let prefix = format!("{hash}:");
        if let Some(entry) = self.contracts.scan_prefix(prefix.as_bytes()).next() {
            let (key, bytes) = entry?;
            let key = String::from_utf8_lossy(&key).to_string();
            return Ok(Some((key, serde_json::from_slice(&bytes)?)));
        }
        Ok(None)
    }

    /// Every contract covering a shard hash.
    pub fn contracts_for_hash(&self, hash: &str) -> Result<Vec<(String, Contract)>> {
        let prefix = format!("{hash}:");
        let mut found = Vec::new();
        for entry in self.contracts.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = entry?;
            found.push((
                String::from_utf8_lossy(&key).to_string(),
                serde_json::from_slice(&bytes)?,
            ));
        }
        Ok(found)
    }

    /// All stored contracts, for the reaping sweep.
    pub fn iter_all(&self) -> Result<Vec<(String, Contract)>> {
        let mut found = Vec::new();
        for entry in self.contracts.iter() {
            let (key, bytes) = entry?;
            found.push((
                String::from_utf8_lossy(&key).to_string(),
                serde_json::from_slice(&bytes)?,
            ));
        }
        Ok(found)
    }

    /// Number of stored contracts.
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Flush to disk.
    pub fn flush(&self) -> Result<()> {
        self.contracts.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use silo_protocol::contract::fields;
    use tempfile::tempdir;

    fn contract(hash: &str) -> Contract {
        let mut c = Contract::draft();
        c.set(fields::DATA_HASH, json!(hash)).unwrap();
        c.set(fields::DATA_SIZE, json!(128u64)).unwrap();
        c
    }

    #[test]
    fn test_put_get_remove() {
        let dir = tempdir().unwrap();
        let store = ContractStore::open(dir.path()).unwrap();
        let hash = "ab".repeat(20);
        let key = format!("{hash}:renter-xpub");

        store.put(&key, &contract(&hash)).unwrap();
        let loaded = store.get(&key).unwrap().expect("stored contract");
        assert_eq!(loaded.data_hash(), Some(hash.as_str()));

        store.remove(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
        // Removing again is fine.
        store.remove(&key).unwrap();
    }

    #[test]
    fn test_find_by_hash_scans_prefix() {
        let dir = tempdir().unwrap();
        let store = ContractStore::open(dir.path()).unwrap();
        let hash_a = "aa".repeat(20);
        let hash_b = "bb".repeat(20);

        store
            .put(&format!("{hash_a}:xpub-1"), &contract(&hash_a))
            .unwrap();
        store
            .put(&format!("{hash_a}:xpub-2"), &contract(&hash_a))
            .unwrap();
        store
            .put(&format!("{hash_b}:xpub-1"), &contract(&hash_b))
            .unwrap();

        let (key, found) = store.find_by_hash(&hash_a).unwrap().expect("match");
        assert!(key.starts_with(&hash_a));
        assert_eq!(found.data_hash(), Some(hash_a.as_str()));

        assert_eq!(store.contracts_for_hash(&hash_a).unwrap().len(), 2);
        assert_eq!(store.contracts_for_hash(&hash_b).unwrap().len(), 1);
        assert!(store.find_by_hash(&"cc".repeat(20)).unwrap().is_none());
    }

    #[test]
    fn test_one_contract_per_pair_last_writer_wins() {
        let dir = tempdir().unwrap();
        let store = ContractStore::open(dir.path()).unwrap();
        let hash = "cd".repeat(20);
        let key = format!("{hash}:same-xpub");

        let mut first = contract(&hash);
        first.set(fields::DATA_SIZE, json!(1u64)).unwrap();
        let mut second = contract(&hash);
        second.set(fields::DATA_SIZE, json!(2u64)).unwrap();

        store.put(&key, &first).unwrap();
        store.put(&key, &second).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().unwrap().data_size(), Some(2));
    }

    #[test]
    fn test_iter_all_for_reaping() {
        let dir = tempdir().unwrap();
        let store = ContractStore::open(dir.path()).unwrap();
        for i in 0..3 {
            let hash = format!("{i:02}").repeat(20);
            store.put(&format!("{hash}:x"), &contract(&hash)).unwrap();
        }
        assert_eq!(store.iter_all().unwrap().len(), 3);
    }
}
