//! Per-peer fragment database.
//!
//! Maps ring keys to the fragments this peer holds for them, paired with a
//! [`MerkleIndex`] over the key set for cheap replica comparison. The index
//! mirrors the map exactly: every public operation leaves the index's leaf
//! set equal to the map's key set.
//!
//! A key normally carries a single fragment, since DHash places one
//! fragment per successor. When the ring is smaller than the fragment
//! count, one peer occupies several successor slots and [`Database::absorb`]
//! admits the extra rows under the same key; fragments are kept ordered and
//! deduplicated by row index.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::block::DataFragment;
use crate::key::Key;
use crate::merkle::MerkleIndex;

/// Database precondition failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Insert of a key (or fragment row) that is already present.
    KeyPresent,
    /// Lookup, update, or delete of a key that is not present.
    KeyAbsent,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::KeyPresent => write!(f, "key already exists in database"),
            StoreError::KeyAbsent => write!(f, "key does not exist in database"),
        }
    }
}

impl std::error::Error for StoreError {}

/// In-memory key-to-fragment store with a Merkle index over its keys.
#[derive(Debug, Default)]
pub struct Database {
    data: BTreeMap<Key, BTreeSet<DataFragment>>,
    index: MerkleIndex,
}

impl Database {
    pub fn new() -> Database {
        Database::default()
    }

    /// Store the first fragment for a key. Fails if the key is present.
    pub fn insert(&mut self, key: Key, fragment: DataFragment) -> Result<(), StoreError> {
        if self.data.contains_key(&key) {
            return Err(StoreError::KeyPresent);
        }
        self.index.insert(&key);
        self.data.insert(key, BTreeSet::from([fragment]));
        Ok(())
    }

    /// Store an additional fragment under a key that may already exist.
    /// Fails only if that fragment row is already held.
    pub fn absorb(&mut self, key: Key, fragment: DataFragment) -> Result<(), StoreError> {
        match self.data.get_mut(&key) {
            None => self.insert(key, fragment),
            Some(fragments) => {
                if fragments.insert(fragment) {
                    Ok(())
                } else {
                    Err(StoreError::KeyPresent)
                }
            }
        }
    }

    /// Replace the fragments held for an existing key.
    pub fn update(&mut self, key: &Key, fragment: DataFragment) -> Result<(), StoreError> {
        match self.data.get_mut(key) {
            None => Err(StoreError::KeyAbsent),
            Some(fragments) => {
                *fragments = BTreeSet::from([fragment]);
                Ok(())
            }
        }
    }

    /// Drop a key, from the map and the index both.
    pub fn delete(&mut self, key: &Key) -> Result<(), StoreError> {
        if self.data.remove(key).is_none() {
            return Err(StoreError::KeyAbsent);
        }
        self.index.delete(key);
        Ok(())
    }

    /// The lowest-indexed fragment held for a key.
    ///
    /// Membership is answered by the index, which mirrors the map.
    pub fn lookup(&self, key: &Key) -> Result<&DataFragment, StoreError> {
        if !self.index.contains(key) {
            return Err(StoreError::KeyAbsent);
        }
        self.data
            .get(key)
            .and_then(|fragments| fragments.first())
            .ok_or(StoreError::KeyAbsent)
    }

    /// Every fragment held for a key.
    pub fn fragments<'a>(&'a self, key: &Key) -> impl Iterator<Item = &'a DataFragment> + 'a {
        self.data.get(key).into_iter().flatten()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.index.contains(key)
    }

    /// Keys on the clockwise arc `[lower, upper]`, each with its
    /// lowest-indexed fragment.
    pub fn read_range(&self, lower: &Key, upper: &Key) -> Vec<(Key, DataFragment)> {
        self.data
            .iter()
            .filter(|(key, _)| key.in_between(lower, upper, true))
            .filter_map(|(key, fragments)| {
                fragments.first().map(|fragment| (key.clone(), fragment.clone()))
            })
            .collect()
    }

    /// Keys on the clockwise arc `[lower, upper]`.
    pub fn keys_in_range(&self, lower: &Key, upper: &Key) -> Vec<Key> {
        self.data
            .keys()
            .filter(|key| key.in_between(lower, upper, true))
            .cloned()
            .collect()
    }

    /// The first key strictly greater than `key`, wrapping to the first key
    /// in the ring when none is greater. `None` only when empty.
    pub fn next(&self, key: &Key) -> Option<&Key> {
        self.data
            .range((std::ops::Bound::Excluded(key.clone()), std::ops::Bound::Unbounded))
            .next()
            .map(|(next, _)| next)
            .or_else(|| self.data.keys().next())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Root hash of the Merkle index over the stored keys.
    pub fn index_hash(&self) -> Option<&Key> {
        self.index.root_hash()
    }

    /// JSON form of the index, for wire comparison with a replica.
    pub fn index_json(&self) -> serde_json::Value {
        self.index.to_json()
    }
}
