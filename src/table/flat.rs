//! Flat hash table: one shard
//!
//! A thin layer over `hashbrown::HashTable` that owns the capability surface
//! the two-level layer routes into: lookup and insertion by precomputed
//! hash, a reserve-or-locate primitive with an inserted flag, an unchecked
//! unique-insert fast path, byte-footprint accounting, and binary/text
//! serialization of its full contents. Probing and growth stay hashbrown's
//! problem; cells carry their cached hash so relocation never re-hashes.
//!
//! The zero key is kept out of line in a dedicated slot and iterated first,
//! so a table that contains it always yields it as its first entry.

use std::hash::BuildHasher;
use std::io::{Read, Write};
use std::mem;
use std::{iter, option};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::hash_table::{self, HashTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::cell::{hash_of, Cell, ZeroKey};
use crate::io::{self, ByteReader};
use crate::Result;

/// Growth degree (log2 slot count) to pre-size a table that is about to
/// absorb roughly one more table's worth of entries. Small tables skip a
/// doubling step. Pure sizing hint; correctness never depends on it.
pub fn presize_degree(degree: u8) -> u8 {
    if degree >= 15 {
        degree + 1
    } else {
        degree + 2
    }
}

// ============================================================================
// Flat Table
// ============================================================================

/// A single flat hash table keyed by `K`, mapping to `V`.
///
/// Used standalone as the accumulation structure of a group-by pipeline,
/// and as the per-shard table inside [`TwoLevelTable`](super::TwoLevelTable).
pub struct FlatTable<K, V, S = ahash::RandomState> {
    /// Out-of-line slot for the zero key
    zero: Option<Cell<K, V>>,
    /// All non-zero cells
    cells: HashTable<Cell<K, V>>,
    hash_builder: S,
}

impl<K, V, S: Default> Default for FlatTable<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S: Default> FlatTable<K, V, S> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with `1 << degree` slots pre-allocated
    pub fn with_size_degree(degree: u8) -> Self {
        Self::with_capacity_and_hasher(1usize << degree, S::default())
    }
}

impl<K, V, S> FlatTable<K, V, S> {
    /// Create an empty table with the given hash state
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            zero: None,
            cells: HashTable::new(),
            hash_builder,
        }
    }

    /// Create with pre-allocated capacity and the given hash state
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            zero: None,
            cells: HashTable::with_capacity(capacity),
            hash_builder,
        }
    }

    /// The table's hash state
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.cells.len() + usize::from(self.zero.is_some())
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.zero.is_none() && self.cells.is_empty()
    }

    /// Backing-storage byte count, for upstream memory-limit accounting
    pub fn buffer_bytes(&self) -> usize {
        self.cells.capacity() * mem::size_of::<Cell<K, V>>()
    }

    /// Iterate all cells, zero entry first
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.zero.iter().chain(self.cells.iter()),
        }
    }

    /// Iterate all cells mutably, zero entry first
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.zero.iter_mut().chain(self.cells.iter_mut()),
        }
    }
}

impl<K: ZeroKey, V, S: BuildHasher> FlatTable<K, V, S> {
    /// Hash a key under this table's hash state
    pub fn hash_of(&self, key: &K) -> u64 {
        hash_of(&self.hash_builder, key)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Lookup by key and precomputed hash
    pub fn find_hashed(&self, key: &K, hash: u64) -> Option<&Cell<K, V>> {
        if key.is_zero() {
            return self.zero.as_ref();
        }
        self.cells.find(hash, |c| &c.key == key)
    }

    /// Mutable lookup by key and precomputed hash
    pub fn find_hashed_mut(&mut self, key: &K, hash: u64) -> Option<&mut Cell<K, V>> {
        if key.is_zero() {
            return self.zero.as_mut();
        }
        self.cells.find_mut(hash, |c| &c.key == key)
    }

    /// Lookup a value by key
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_hashed(key, self.hash_of(key)).map(|c| &c.value)
    }

    /// Mutable lookup of a value by key
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_of(key);
        self.find_hashed_mut(key, hash).map(|c| &mut c.value)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_hashed(key, self.hash_of(key)).is_some()
    }

    // ========================================================================
    // Insert / Reserve
    // ========================================================================

    /// Locate the key's slot, constructing the cell with `make` if absent.
    /// Returns the inserted flag and the slot; an existing slot is left
    /// untouched and `make` is never called for it.
    fn slot_with(&mut self, key: K, hash: u64, make: impl FnOnce() -> V) -> (bool, &mut V) {
        if key.is_zero() {
            let inserted = self.zero.is_none();
            let cell = self
                .zero
                .get_or_insert_with(|| Cell::new(key, make(), hash));
            return (inserted, &mut cell.value);
        }
        match self.cells.entry(hash, |c| c.key == key, |c| c.hash) {
            hash_table::Entry::Occupied(entry) => (false, &mut entry.into_mut().value),
            hash_table::Entry::Vacant(entry) => {
                let cell = entry.insert(Cell::new(key, make(), hash)).into_mut();
                (true, &mut cell.value)
            }
        }
    }

    /// Insert a key/value pair. If the key already exists, the stored value
    /// is left untouched and `value` is dropped. Returns the inserted flag
    /// and the slot.
    pub fn insert(&mut self, key: K, value: V) -> (bool, &mut V) {
        let hash = self.hash_of(&key);
        self.insert_hashed(key, hash, value)
    }

    /// [`insert`](Self::insert) with a precomputed hash
    pub fn insert_hashed(&mut self, key: K, hash: u64, value: V) -> (bool, &mut V) {
        self.slot_with(key, hash, move || value)
    }

    /// Reserve-or-locate the key's slot with a precomputed hash.
    ///
    /// A freshly reserved slot holds `V::default()` so no uninitialized
    /// value is ever observable; the caller is expected to write the real
    /// payload through the returned reference when the flag is true.
    pub fn reserve_entry(&mut self, key: K, hash: u64) -> (bool, &mut V)
    where
        V: Default,
    {
        self.slot_with(key, hash, V::default)
    }

    /// Unchecked unique insert of a non-zero cell with a valid cached hash.
    ///
    /// The caller guarantees the key is absent; no probe for an existing
    /// cell is made. Used by the flat→two-level converter, merging, and the
    /// deserializers, where the source is already known duplicate-free.
    pub fn insert_unique(&mut self, cell: Cell<K, V>) {
        debug_assert!(!cell.key.is_zero());
        self.cells.insert_unique(cell.hash, cell, |c| c.hash);
    }

    /// Insert a cell, resolving a key collision with `combine`
    pub fn merge_cell<F: FnMut(&mut V, V)>(&mut self, cell: Cell<K, V>, combine: &mut F) {
        if cell.key.is_zero() {
            match self.zero.as_mut() {
                Some(existing) => combine(&mut existing.value, cell.value),
                None => self.zero = Some(cell),
            }
            return;
        }
        match self.cells.entry(cell.hash, |c| c.key == cell.key, |c| c.hash) {
            hash_table::Entry::Occupied(entry) => {
                combine(&mut entry.into_mut().value, cell.value)
            }
            hash_table::Entry::Vacant(entry) => {
                entry.insert(cell);
            }
        }
    }

    /// Merge another table into this one, consuming it. Cached hashes are
    /// reused, so both tables must share the same hash state.
    pub fn merge_from<F: FnMut(&mut V, V)>(&mut self, other: Self, combine: &mut F) {
        for cell in other {
            self.merge_cell(cell, combine);
        }
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Write the full contents in binary form: a little-endian `u64` entry
    /// count, then each entry as a bincode `(key, value)` tuple, zero entry
    /// first.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        w.write_u64::<LittleEndian>(self.len() as u64)?;
        for cell in self.iter() {
            bincode::serialize_into(&mut *w, &(&cell.key, &cell.value))?;
        }
        Ok(())
    }

    /// Read binary contents written by [`write`](Self::write).
    ///
    /// The table must be freshly constructed: entries are installed through
    /// the unchecked unique path, so pre-existing duplicates go undetected.
    pub fn read<R: Read>(&mut self, r: &mut R) -> Result<()>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let n = r.read_u64::<LittleEndian>()?;
        for _ in 0..n {
            let (key, value): (K, V) = bincode::deserialize_from(&mut *r)?;
            self.insert_deserialized(key, value);
        }
        Ok(())
    }

    /// Write the full contents in text form: a decimal entry count, then
    /// for each entry a `,` followed by the `(key, value)` tuple as one
    /// JSON value, zero entry first.
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        io::write_text_u64(w, self.len() as u64)?;
        for cell in self.iter() {
            io::write_char(w, b',')?;
            serde_json::to_writer(&mut *w, &(&cell.key, &cell.value))?;
        }
        Ok(())
    }

    /// Read text contents written by [`write_text`](Self::write_text).
    /// Same freshly-constructed requirement as [`read`](Self::read).
    pub fn read_text<R: Read>(&mut self, r: R) -> Result<()>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let mut r = ByteReader::new(r);
        self.read_text_raw(&mut r)
    }

    pub(crate) fn read_text_raw<R: Read>(&mut self, r: &mut ByteReader<R>) -> Result<()>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let n = r.read_text_u64()?;
        for _ in 0..n {
            r.assert_char(b',')?;
            let mut de = serde_json::Deserializer::from_reader(&mut *r);
            let (key, value) = <(K, V)>::deserialize(&mut de)?;
            self.insert_deserialized(key, value);
        }
        Ok(())
    }

    fn insert_deserialized(&mut self, key: K, value: V) {
        let hash = self.hash_of(&key);
        if key.is_zero() {
            self.zero = Some(Cell::new(key, value, hash));
        } else {
            self.insert_unique(Cell::new(key, value, hash));
        }
    }
}

// ============================================================================
// Iterators
// ============================================================================

/// Borrowing cursor over a flat table, zero entry first
pub struct Iter<'a, K, V> {
    inner: iter::Chain<option::Iter<'a, Cell<K, V>>, hash_table::Iter<'a, Cell<K, V>>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = &'a Cell<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Mutable cursor over a flat table, zero entry first
pub struct IterMut<'a, K, V> {
    inner: iter::Chain<option::IterMut<'a, Cell<K, V>>, hash_table::IterMut<'a, Cell<K, V>>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = &'a mut Cell<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Consuming cursor over a flat table, zero entry first
pub struct IntoIter<K, V> {
    inner: iter::Chain<option::IntoIter<Cell<K, V>>, hash_table::IntoIter<Cell<K, V>>>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = Cell<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<'a, K, V, S> IntoIterator for &'a FlatTable<K, V, S> {
    type Item = &'a Cell<K, V>;
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> IntoIterator for FlatTable<K, V, S> {
    type Item = Cell<K, V>;
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.zero.into_iter().chain(self.cells.into_iter()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
