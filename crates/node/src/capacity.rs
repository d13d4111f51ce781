//! Renter-side capacity cache.
//!
//! Farmers announce `{available, allocated}` on capacity topics; renters
//! fold the announcements into a per-farmer cache and pick counterparties
//! from it when claiming capacity directly. Stale entries are dropped by
//! a periodic compaction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use silo_protocol::Contact;
use silo_store::StorageUsage;

/// Payload a farmer publishes on a capacity topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityAnnouncement {
    pub capacity: StorageUsage,
    pub contact: Contact,
}

/// Cached view of one farmer's last announcement.
#[derive(Debug, Clone)]
pub struct FarmerCapacity {
    pub capacity: StorageUsage,
    pub contact: Contact,
    pub last_seen: Instant,
}

/// Farmer identity (hex) → latest capacity announcement.
pub struct CapacityCache {
    entries: HashMap<String, FarmerCapacity>,
    max_age: Duration,
}

impl CapacityCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_age,
        }
    }

    /// Fold in an announcement.
    pub fn update(&mut self, announcement: CapacityAnnouncement) {
        let identity = announcement.contact.identity.to_string();
        self.entries.insert(
            identity,
            FarmerCapacity {
                capacity: announcement.capacity,
                contact: announcement.contact,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn get(&self, identity: &str) -> Option<&FarmerCapacity> {
        self.entries.get(identity)
    }

    /// Farmers with enough room for a shard, freshest first.
    pub fn candidates_for(&self, data_size: u64) -> Vec<&FarmerCapacity> {
        let mut matches: Vec<&FarmerCapacity> = self
            .entries
            .values()
            .filter(|entry| entry.capacity.available >= data_size)
            .collect();
        matches.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        matches
    }

    /// Drop entries older than the max age. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let cutoff = Instant::now();
        let max_age = self.max_age;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| cutoff.duration_since(entry.last_seen) <= max_age);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Capacity cache compacted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
