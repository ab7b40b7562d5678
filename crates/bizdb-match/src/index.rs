//! In-memory lookup from normalized (name, address prefix) to registry id.

use std::collections::HashMap;

use bizdb_core::CanonicalRecord;

use crate::normalize::{address_prefix, normalize, ADDRESS_PREFIX_TOKENS};

/// Derived matching key. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedKey {
    pub name: String,
    pub address_prefix: String,
}

impl NormalizedKey {
    /// Build the key for a name and a full (untruncated) road address.
    #[must_use]
    pub fn from_parts(name: &str, road_address: &str) -> Self {
        Self {
            name: normalize(name),
            address_prefix: normalize(&address_prefix(road_address, ADDRESS_PREFIX_TOKENS)),
        }
    }
}

/// Read-only index over the canonical record set, built once per batch.
#[derive(Debug, Default)]
pub struct CanonicalIndex {
    entries: HashMap<NormalizedKey, i64>,
    collisions: usize,
}

impl CanonicalIndex {
    #[must_use]
    pub fn lookup(&self, key: &NormalizedKey) -> Option<i64> {
        self.entries.get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many records overwrote an earlier record with the same key.
    #[must_use]
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn keys(&self) -> impl Iterator<Item = &NormalizedKey> {
        self.entries.keys()
    }
}

/// Build the index in one pass over `records`.
///
/// Records with a missing or blank name or road address are skipped. When two
/// records produce the same key the later one wins; the overwrite is counted
/// but otherwise left alone, so the winner depends on input order.
#[must_use]
pub fn build_index<'a, I>(records: I) -> CanonicalIndex
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut index = CanonicalIndex::default();
    let mut skipped = 0usize;

    for record in records {
        let (Some(name), Some(address)) = (
            record.business_name.as_deref().filter(|s| !s.trim().is_empty()),
            record.road_address.as_deref().filter(|s| !s.trim().is_empty()),
        ) else {
            skipped += 1;
            continue;
        };

        let key = NormalizedKey::from_parts(name, address);
        if let Some(previous) = index.entries.insert(key, record.id) {
            index.collisions += 1;
            tracing::debug!(
                previous,
                winner = record.id,
                "index key collision; later record wins"
            );
        }
    }

    if index.collisions > 0 {
        tracing::warn!(
            collisions = index.collisions,
            "canonical index has colliding keys; last record per key wins"
        );
    }
    tracing::info!(entries = index.len(), skipped, "canonical index built");

    index
}
