//! Table cells and key hashing

use std::hash::{BuildHasher, Hash};

/// Keys storable in the tables.
///
/// The zero key doubles as the flat layout's empty marker, so it is stored
/// out of line and detected through `is_zero` rather than by probing.
pub trait ZeroKey: Eq + Hash {
    fn is_zero(&self) -> bool;
}

impl<T: Default + Eq + Hash> ZeroKey for T {
    fn is_zero(&self) -> bool {
        *self == T::default()
    }
}

/// Hash of the zero key.
///
/// Pinned to 0 so that high-bit routing always places the zero entry in
/// shard 0; together with the zero slot being iterated first, a converted
/// table yields the zero entry before any other entry.
pub const ZERO_KEY_HASH: u64 = 0;

/// Hash a key under `state`, with the zero-key pin applied.
pub(crate) fn hash_of<K: ZeroKey, S: BuildHasher>(state: &S, key: &K) -> u64 {
    if key.is_zero() {
        ZERO_KEY_HASH
    } else {
        state.hash_one(key)
    }
}

// ============================================================================
// Cell
// ============================================================================

/// One stored entry: key, mapped value, and the key's cached hash.
///
/// The cached hash lets growth rehashing, conversion, and merging relocate
/// the cell without touching the hash function again.
#[derive(Debug, Clone)]
pub struct Cell<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) hash: u64,
}

impl<K, V> Cell<K, V> {
    pub(crate) fn new(key: K, value: V, hash: u64) -> Self {
        Self { key, value, hash }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    /// Cached hash of the key.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Split the cell into its key and value.
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}
