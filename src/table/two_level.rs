//! Two-level (sharded) hash table
//!
//! `2^B` independent [`FlatTable`] shards behind one map interface. A key's
//! shard is a pure function of its hash, so two tables with the same shard
//! count merge shard `i` against shard `i` and nothing else, which makes
//! merge trivially parallel. Each shard grows alone, so resize
//! latency is paid in small, cache-local steps.
//!
//! Usually a touch slower than a single flat table for point operations;
//! worth it once tables get large enough to merge or to resize painfully.

use std::hash::BuildHasher;
use std::io::{Read, Write};

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cell::{hash_of, Cell, ZeroKey};
use super::flat::{self, presize_degree, FlatTable};
use crate::io::{self, ByteReader};
use crate::Result;

/// Default shard bit width: 256 shards
pub const DEFAULT_BITS: u32 = 8;

/// Routing reads the top bits of a 32-bit hash window
const HASH_WINDOW_BITS: u32 = 32;

// ============================================================================
// Two-level Table
// ============================================================================

/// A key→value table sharded across `2^bits` flat tables.
///
/// Deliberately not `Clone`: the only supported way to build one from
/// existing data is the one-shot converting constructor
/// [`from_flat`](Self::from_flat).
pub struct TwoLevelTable<K, V, S = ahash::RandomState> {
    /// One flat table per routing value, fixed at construction
    shards: Box<[FlatTable<K, V, S>]>,
    bits: u32,
    hash_builder: S,
}

impl<K, V, S: Default + Clone> Default for TwoLevelTable<K, V, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S: Default + Clone> TwoLevelTable<K, V, S> {
    /// Create an empty table with [`DEFAULT_BITS`]
    pub fn new() -> Self {
        Self::with_bits(DEFAULT_BITS)
    }

    /// Create an empty table with `2^bits` shards
    pub fn with_bits(bits: u32) -> Self {
        Self::with_bits_and_hasher(bits, S::default())
    }
}

impl<K, V, S: Clone> TwoLevelTable<K, V, S> {
    /// Create an empty table with `2^bits` shards sharing `hash_builder`.
    ///
    /// All shards must hash under the same state as the router, so the
    /// builder is cloned into each shard. `bits` is fixed for the table's
    /// lifetime.
    pub fn with_bits_and_hasher(bits: u32, hash_builder: S) -> Self {
        assert!(
            (1..=16).contains(&bits),
            "shard bits must be in 1..=16, got {}",
            bits
        );
        let shards: Vec<FlatTable<K, V, S>> = (0..1usize << bits)
            .map(|_| FlatTable::with_hasher(hash_builder.clone()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
            bits,
            hash_builder,
        }
    }
}

impl<K, V, S> TwoLevelTable<K, V, S> {
    /// Shard bit width
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        1usize << self.bits
    }

    /// Route a hash to its shard: the top `bits` of the 32-bit hash window.
    ///
    /// High bits are used on purpose: the flat tables place cells by the low
    /// bits, so shard choice stays decorrelated from slot choice. Known
    /// limitation, accepted as designed: once a table needs more than ~2^32
    /// slots overall, the 32-bit window no longer spreads shards evenly.
    pub fn shard_for_hash(&self, hash: u64) -> usize {
        ((hash >> (HASH_WINDOW_BITS - self.bits)) as usize) & (self.shard_count() - 1)
    }

    /// The table's hash state
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Borrow one shard
    pub fn shard(&self, index: usize) -> &FlatTable<K, V, S> {
        &self.shards[index]
    }

    /// All shards, in routing order
    pub fn shards(&self) -> &[FlatTable<K, V, S>] {
        &self.shards
    }

    /// All shards mutably, for callers working disjoint shard ranges in
    /// parallel. Shards share no storage, so this is the safe seam for
    /// structural parallelism.
    pub fn shards_mut(&mut self) -> &mut [FlatTable<K, V, S>] {
        &mut self.shards
    }

    /// Total entry count, summed over shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(FlatTable::len).sum()
    }

    /// True iff every shard is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(FlatTable::is_empty)
    }

    /// Total backing-storage byte count, summed over shards
    pub fn buffer_bytes(&self) -> usize {
        self.shards.iter().map(FlatTable::buffer_bytes).sum()
    }

    /// Cursor over all entries: ascending shard index, empty shards
    /// skipped, intra-shard order unspecified.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            shards: &self.shards,
            shard: 0,
            inner: self.shards[0].iter(),
        }
    }
}

impl<K: ZeroKey, V, S: BuildHasher> TwoLevelTable<K, V, S> {
    /// Hash a key under this table's hash state
    pub fn hash_of(&self, key: &K) -> u64 {
        hash_of(&self.hash_builder, key)
    }

    // ========================================================================
    // Insert / Reserve / Find
    // ========================================================================

    /// Insert a key/value pair: hash once, route, forward to the shard.
    ///
    /// If the key already exists the stored value is left untouched and
    /// `value` is dropped. Only the target shard may grow.
    pub fn insert(&mut self, key: K, value: V) -> Reserved<'_, V> {
        let hash = self.hash_of(&key);
        let shard = self.shard_for_hash(hash);
        let (inserted, slot) = self.shards[shard].insert_hashed(key, hash, value);
        Reserved {
            inserted,
            shard,
            value: slot,
        }
    }

    /// Two-phase reserve-then-construct.
    ///
    /// A freshly reserved slot already holds `V::default()`; when
    /// `inserted` is true the caller initializes the payload through the
    /// handle before reading it anywhere else.
    pub fn reserve(&mut self, key: K) -> Reserved<'_, V>
    where
        V: Default,
    {
        let hash = self.hash_of(&key);
        self.reserve_hashed(key, hash)
    }

    /// [`reserve`](Self::reserve) with a precomputed hash, for callers that
    /// already derived it for routing or deduplication elsewhere.
    pub fn reserve_hashed(&mut self, key: K, hash: u64) -> Reserved<'_, V>
    where
        V: Default,
    {
        let shard = self.shard_for_hash(hash);
        let (inserted, slot) = self.shards[shard].reserve_entry(key, hash);
        Reserved {
            inserted,
            shard,
            value: slot,
        }
    }

    /// Find the cell holding `key`, if any
    pub fn find(&self, key: &K) -> Option<&Cell<K, V>> {
        self.find_hashed(key, self.hash_of(key))
    }

    /// [`find`](Self::find) with a precomputed hash
    pub fn find_hashed(&self, key: &K, hash: u64) -> Option<&Cell<K, V>> {
        self.shards[self.shard_for_hash(hash)].find_hashed(key, hash)
    }

    /// Lookup a value by key
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(key).map(Cell::value)
    }

    /// Mutable lookup of a value by key
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_of(key);
        let shard = self.shard_for_hash(hash);
        self.shards[shard]
            .find_hashed_mut(key, hash)
            .map(Cell::value_mut)
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    /// Build a sharded table from a flat one with [`DEFAULT_BITS`],
    /// consuming it. See [`from_flat_with_bits`](Self::from_flat_with_bits).
    pub fn from_flat(src: FlatTable<K, V, S>) -> Self
    where
        S: Clone,
    {
        Self::from_flat_with_bits(src, DEFAULT_BITS)
    }

    /// Build a sharded table from a flat one in a single pass, consuming it.
    ///
    /// The source's hash state is adopted, so the cached hash of every cell
    /// stays valid and nothing is re-hashed: each cell is routed by its
    /// cached hash and installed through the unchecked unique path (the
    /// source holds no duplicate keys). The zero entry, which the source
    /// iterates first, goes through the ordinary insert path first so the
    /// converted table also yields it before any other entry.
    ///
    /// Shards are pre-sized once from the source's size via
    /// [`presize_degree`]; callers wanting different pre-reservation can
    /// build shards by hand through the plain constructors and `merge_cell`.
    pub fn from_flat_with_bits(src: FlatTable<K, V, S>, bits: u32) -> Self
    where
        S: Clone,
    {
        assert!(
            (1..=16).contains(&bits),
            "shard bits must be in 1..=16, got {}",
            bits
        );
        let hash_builder = src.hasher().clone();
        let total = src.len();

        let per_shard = total >> bits;
        let shards: Vec<FlatTable<K, V, S>> = (0..1usize << bits)
            .map(|_| {
                if per_shard > 0 {
                    let degree = per_shard.next_power_of_two().trailing_zeros() as u8;
                    FlatTable::with_capacity_and_hasher(
                        1usize << presize_degree(degree),
                        hash_builder.clone(),
                    )
                } else {
                    FlatTable::with_hasher(hash_builder.clone())
                }
            })
            .collect();

        let mut table = Self {
            shards: shards.into_boxed_slice(),
            bits,
            hash_builder,
        };

        let mut cells = src.into_iter().peekable();
        if let Some(first) = cells.next_if(|c| c.key().is_zero()) {
            let (key, value) = first.into_pair();
            table.insert(key, value);
        }
        for cell in cells {
            let shard = table.shard_for_hash(cell.hash());
            table.shards[shard].insert_unique(cell);
        }

        log::debug!(
            "converted flat table of {} entries into {} shards",
            total,
            table.shard_count()
        );
        table
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge another table into this one shard-by-shard, consuming it.
    ///
    /// Both tables must have the same shard count and hash state; cached
    /// hashes are reused, so no key is re-hashed. `combine` resolves key
    /// collisions with the existing slot on the left.
    pub fn merge_from<F: FnMut(&mut V, V)>(&mut self, other: Self, mut combine: F) {
        assert_eq!(
            self.bits, other.bits,
            "only tables with equal shard counts can merge"
        );
        let merged = other.len();
        for (dst, src) in self.shards.iter_mut().zip(Vec::from(other.shards)) {
            dst.merge_from(src, &mut combine);
        }
        log::debug!("merged {} entries, table now holds {}", merged, self.len());
    }

    /// [`merge_from`](Self::merge_from) with shard pairs processed in
    /// parallel. Safe without locks: shard `i` only ever meets shard `i`,
    /// and shards share no storage.
    pub fn par_merge_from<F>(&mut self, other: Self, combine: F)
    where
        F: Fn(&mut V, V) + Sync,
        K: Send,
        V: Send,
        S: Send,
    {
        assert_eq!(
            self.bits, other.bits,
            "only tables with equal shard counts can merge"
        );
        self.shards
            .par_iter_mut()
            .zip(Vec::from(other.shards).into_par_iter())
            .for_each(|(dst, src)| {
                dst.merge_from(src, &mut |slot, incoming| combine(slot, incoming));
            });
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Binary write: each shard's own payload, in shard-index order, pure
    /// concatenation. No count header, no delimiters; the reader must be
    /// constructed with the same `bits`.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        for shard in self.shards.iter() {
            shard.write(w)?;
        }
        Ok(())
    }

    /// Binary read into a freshly constructed table with the same `bits`
    /// and hash state as the writer. A truncated or malformed stream aborts
    /// the read and leaves the table partially populated; treat it as
    /// unusable.
    pub fn read<R: Read>(&mut self, r: &mut R) -> Result<()>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        for shard in self.shards.iter_mut() {
            shard.read(r)?;
        }
        Ok(())
    }

    /// Text write: shard payloads in index order, separated by exactly one
    /// comma: `shard_count - 1` separators, none leading or trailing.
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        for (i, shard) in self.shards.iter().enumerate() {
            if i != 0 {
                io::write_char(w, b',')?;
            }
            shard.write_text(w)?;
        }
        Ok(())
    }

    /// Text read, mirroring [`write_text`](Self::write_text). A missing
    /// separator is a parse failure; same fresh-table and partial-population
    /// rules as [`read`](Self::read).
    pub fn read_text<R: Read>(&mut self, r: R) -> Result<()>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let mut r = ByteReader::new(r);
        for i in 0..self.shards.len() {
            if i != 0 {
                r.assert_char(b',')?;
            }
            self.shards[i].read_text_raw(&mut r)?;
        }
        Ok(())
    }
}

// ============================================================================
// Reserved slot handle
// ============================================================================

/// Result of an insert or reserve: where the key's slot lives and whether
/// this call created it.
pub struct Reserved<'a, V> {
    /// True iff the key was absent and its slot was created by this call
    pub inserted: bool,
    /// Index of the shard holding the slot
    pub shard: usize,
    /// The slot itself
    pub value: &'a mut V,
}

// ============================================================================
// Composite cursor
// ============================================================================

/// Cursor over all shards as one logical sequence: ascending shard index,
/// empty shards skipped.
pub struct Iter<'a, K, V, S> {
    shards: &'a [FlatTable<K, V, S>],
    shard: usize,
    inner: flat::Iter<'a, K, V>,
}

impl<'a, K, V, S> Iter<'a, K, V, S> {
    /// Index of the shard the cursor is currently positioned in
    pub fn shard_index(&self) -> usize {
        self.shard
    }
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S> {
    type Item = &'a Cell<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cell) = self.inner.next() {
                return Some(cell);
            }
            if self.shard + 1 >= self.shards.len() {
                return None;
            }
            self.shard += 1;
            self.inner = self.shards[self.shard].iter();
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a TwoLevelTable<K, V, S> {
    type Item = &'a Cell<K, V>;
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    type Table = TwoLevelTable<u64, u64>;

    #[test]
    fn test_routing_reads_top_window_bits() {
        let t = Table::new();
        assert_eq!(t.shard_count(), 256);
        assert_eq!(t.shard_for_hash(0x0000_0000), 0);
        assert_eq!(t.shard_for_hash(0x0100_0000), 1);
        assert_eq!(t.shard_for_hash(0xFF00_0000), 255);
        // low bits never influence the shard
        assert_eq!(t.shard_for_hash(0x0100_FFFF), 1);

        let t4: TwoLevelTable<u64, u64> = TwoLevelTable::with_bits(4);
        assert_eq!(t4.shard_count(), 16);
        assert_eq!(t4.shard_for_hash(0xF000_0000), 15);
        assert_eq!(t4.shard_for_hash(0x1000_0000), 1);
    }

    #[test]
    #[should_panic(expected = "shard bits")]
    fn test_bits_out_of_range_panics() {
        let _ = TwoLevelTable::<u64, u64>::with_bits(17);
    }

    #[test]
    fn test_insert_find_routes_consistently() {
        let mut t = Table::new();
        for k in 1..=500u64 {
            assert!(t.insert(k, k * 2).inserted);
        }
        assert_eq!(t.len(), 500);
        for k in 1..=500u64 {
            let hash = t.hash_of(&k);
            let cell = t.find(&k).unwrap();
            assert_eq!(*cell.key(), k);
            assert_eq!(*cell.value(), k * 2);
            // the entry lives in exactly the shard the router names
            assert!(t.shard(t.shard_for_hash(hash)).find_hashed(&k, hash).is_some());
        }
        assert!(t.find(&501).is_none());
    }

    #[test]
    fn test_double_insert_is_noop() {
        let mut t = Table::new();
        let r = t.insert(9, 90);
        assert!(r.inserted);
        let r = t.insert(9, 1234);
        assert!(!r.inserted);
        assert_eq!(*r.value, 90);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_reserve_two_phase() {
        let mut t: TwoLevelTable<u64, String> = TwoLevelTable::new();
        let expected_shard = t.shard_for_hash(t.hash_of(&5));
        {
            let slot = t.reserve(5);
            assert!(slot.inserted);
            assert!(slot.value.is_empty()); // placeholder, never uninitialized
            *slot.value = "agg-state".to_string();
        }
        let slot = t.reserve(5);
        assert!(!slot.inserted);
        assert_eq!(*slot.value, "agg-state");
        assert_eq!(slot.shard, expected_shard);
    }

    #[test]
    fn test_reserve_hashed_skips_rehash() {
        let mut t = Table::new();
        let hash = t.hash_of(&77);
        assert!(t.reserve_hashed(77, hash).inserted);
        assert_eq!(t.find_hashed(&77, hash).unwrap().hash(), hash);
    }

    #[test]
    fn test_empty_iff_len_zero() {
        let mut t = Table::new();
        assert!(t.is_empty());
        assert_eq!(t.len(), 0);
        t.insert(1, 1);
        assert!(!t.is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_cursor_visits_every_entry_once_in_shard_order() {
        let mut t = Table::new();
        for k in 1..=2000u64 {
            t.insert(k, k);
        }

        let mut seen = HashSet::new();
        let mut last_shard = 0usize;
        let mut it = t.iter();
        while let Some(cell) = it.next() {
            assert!(seen.insert(*cell.key()), "entry visited twice");
            let shard = it.shard_index();
            assert_eq!(shard, t.shard_for_hash(cell.hash()));
            assert!(shard >= last_shard, "shards must be visited in order");
            last_shard = shard;
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_empty_table_cursor_yields_nothing() {
        let t = Table::new();
        assert!(t.iter().next().is_none());
    }

    #[test]
    fn test_from_flat_preserves_everything() {
        let mut flat: FlatTable<u64, u64> = FlatTable::with_size_degree(8);
        flat.insert(0, 111); // zero entry
        for k in 1..=999u64 {
            flat.insert(k, k + 7);
        }

        let t = TwoLevelTable::from_flat(flat);
        assert_eq!(t.len(), 1000);

        // zero entry comes first in the composite cursor
        let first = t.iter().next().unwrap();
        assert!(first.key().is_zero());
        assert_eq!(*first.value(), 111);

        // every entry findable and located in its routed shard
        for k in 0..=999u64 {
            assert!(t.find(&k).is_some());
        }
        for (idx, shard) in t.shards().iter().enumerate() {
            for cell in shard.iter() {
                assert_eq!(t.shard_for_hash(cell.hash()), idx);
            }
        }
    }

    #[test]
    fn test_from_flat_without_zero_entry() {
        let mut flat: FlatTable<u64, u64> = FlatTable::new();
        for k in 1..=64u64 {
            flat.insert(k, k);
        }
        let t = TwoLevelTable::from_flat_with_bits(flat, 4);
        assert_eq!(t.len(), 64);
        assert_eq!(t.shard_count(), 16);
        for k in 1..=64u64 {
            assert_eq!(t.get(&k), Some(&k));
        }
    }

    #[test]
    fn test_merge_from_combines_by_key() {
        let mut a = Table::new();
        let mut b = TwoLevelTable::with_bits_and_hasher(DEFAULT_BITS, a.hasher().clone());
        for k in 1..=300u64 {
            a.insert(k, 1);
        }
        for k in 200..=500u64 {
            b.insert(k, 1);
        }

        a.merge_from(b, |slot, incoming| *slot += incoming);
        assert_eq!(a.len(), 500);
        assert_eq!(a.get(&100), Some(&1));
        assert_eq!(a.get(&250), Some(&2)); // overlap combined
        assert_eq!(a.get(&450), Some(&1));
    }

    #[test]
    fn test_par_merge_from_matches_sequential() {
        let mut a = Table::new();
        let mut b = TwoLevelTable::with_bits_and_hasher(DEFAULT_BITS, a.hasher().clone());
        a.insert(0, 4);
        b.insert(0, 6);
        for k in 1..=5000u64 {
            a.insert(k, k);
            b.insert(k, k);
        }

        a.par_merge_from(b, |slot, incoming| *slot += incoming);
        assert_eq!(a.len(), 5001);
        assert_eq!(a.get(&0), Some(&10));
        for k in 1..=5000u64 {
            assert_eq!(a.get(&k), Some(&(k * 2)));
        }
    }

    #[test]
    fn test_binary_round_trip() {
        let mut t = Table::new();
        t.insert(0, 1);
        for k in 1..=1234u64 {
            t.insert(k, k * 3);
        }

        let mut buf = Vec::new();
        t.write(&mut buf).unwrap();

        let mut back: Table =
            TwoLevelTable::with_bits_and_hasher(DEFAULT_BITS, t.hasher().clone());
        back.read(&mut buf.as_slice()).unwrap();

        assert_eq!(back.len(), t.len());
        for cell in t.iter() {
            assert_eq!(back.get(cell.key()), Some(cell.value()));
        }
    }

    #[test]
    fn test_round_trip_through_file() {
        let mut t = Table::new();
        t.insert(0, 0);
        for k in 1..=777u64 {
            t.insert(k, k * 7);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.bin");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            t.write(&mut f).unwrap();
        }

        let mut back: Table =
            TwoLevelTable::with_bits_and_hasher(DEFAULT_BITS, t.hasher().clone());
        let mut f = std::fs::File::open(&path).unwrap();
        back.read(&mut f).unwrap();

        assert_eq!(back.len(), 778);
        assert_eq!(back.get(&0), Some(&0));
        assert_eq!(back.get(&777), Some(&(777 * 7)));
    }

    #[test]
    fn test_random_group_by_accumulation() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut t: TwoLevelTable<u64, u64> = TwoLevelTable::new();
        let mut reference = std::collections::HashMap::new();

        for _ in 0..10_000 {
            let k: u64 = rng.gen_range(0..5_000);
            let slot = t.reserve(k);
            *slot.value += 1;
            *reference.entry(k).or_insert(0u64) += 1;
        }

        assert_eq!(t.len(), reference.len());
        for (k, count) in &reference {
            assert_eq!(t.get(k), Some(count));
        }
    }

    #[test]
    fn test_text_round_trip() {
        let mut t: TwoLevelTable<String, u64> = TwoLevelTable::with_bits(4);
        t.insert("one".into(), 1);
        t.insert("two".into(), 2);
        t.insert(String::new(), 0);

        let mut buf = Vec::new();
        t.write_text(&mut buf).unwrap();

        let mut back: TwoLevelTable<String, u64> =
            TwoLevelTable::with_bits_and_hasher(4, t.hasher().clone());
        back.read_text(buf.as_slice()).unwrap();

        assert_eq!(back.len(), 3);
        assert_eq!(back.get(&"one".into()), Some(&1));
        assert_eq!(back.get(&"two".into()), Some(&2));
        assert_eq!(back.get(&String::new()), Some(&0));
    }

    #[test]
    fn test_text_form_has_one_separator_between_shards() {
        // an empty table's payload is pure separators around "0" counts
        let t = Table::new();
        let mut buf = Vec::new();
        t.write_text(&mut buf).unwrap();
        let commas = buf.iter().filter(|&&b| b == b',').count();
        assert_eq!(commas, t.shard_count() - 1);
        assert!(!buf.starts_with(b","));
        assert!(!buf.ends_with(b","));

        let t2: TwoLevelTable<u64, u64> = TwoLevelTable::with_bits(2);
        let mut buf = Vec::new();
        t2.write_text(&mut buf).unwrap();
        assert_eq!(buf, b"0,0,0,0");
    }

    #[test]
    fn test_text_missing_separator_is_parse_error() {
        let mut t: TwoLevelTable<u64, u64> = TwoLevelTable::with_bits(2);
        let err = t.read_text(&b"0;0,0,0"[..]).unwrap_err();
        assert!(matches!(
            err,
            crate::AggError::UnexpectedByte { expected: ',', found: Some(';') }
        ));
    }

    #[test]
    fn test_truncated_binary_stream_is_error() {
        let mut t: TwoLevelTable<u64, u64> = TwoLevelTable::with_bits(2);
        for k in 1..=100u64 {
            t.insert(k, k);
        }
        let mut buf = Vec::new();
        t.write(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);

        let mut back: TwoLevelTable<u64, u64> =
            TwoLevelTable::with_bits_and_hasher(2, t.hasher().clone());
        assert!(back.read(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_get_mut() {
        let mut t = Table::new();
        t.insert(8, 80);
        *t.get_mut(&8).unwrap() += 1;
        assert_eq!(t.get(&8), Some(&81));
        assert!(t.get_mut(&9).is_none());
    }

    #[test]
    fn test_disjoint_shard_ranges_mutate_without_locks() {
        let mut t = Table::new();
        for k in 1..=4000u64 {
            t.insert(k, k);
        }

        // two threads, two disjoint shard ranges, zero synchronization
        let (left, right) = t.shards_mut().split_at_mut(128);
        std::thread::scope(|s| {
            s.spawn(move || {
                for shard in left.iter_mut() {
                    for cell in shard.iter_mut() {
                        *cell.value_mut() += 1;
                    }
                }
            });
            s.spawn(move || {
                for shard in right.iter_mut() {
                    for cell in shard.iter_mut() {
                        *cell.value_mut() += 1;
                    }
                }
            });
        });

        for k in 1..=4000u64 {
            assert_eq!(t.get(&k), Some(&(k + 1)));
        }
    }

    #[test]
    fn test_only_routed_shard_grows() {
        let mut t = Table::new();
        let baseline: Vec<usize> = t.shards().iter().map(FlatTable::buffer_bytes).collect();

        let key = 42u64;
        let target = t.shard_for_hash(t.hash_of(&key));
        t.insert(key, 1);

        // sibling shards keep their exact backing storage
        for (idx, shard) in t.shards().iter().enumerate() {
            if idx != target {
                assert_eq!(shard.buffer_bytes(), baseline[idx]);
            }
        }
        assert!(t.shard(target).buffer_bytes() > baseline[target]);
    }
}
