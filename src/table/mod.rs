//! Hash table layers
//!
//! [`FlatTable`] is a single flat hash table (one shard): hashbrown-backed
//! storage with the zero key held out of line and iterated first.
//! [`TwoLevelTable`] routes keys across `2^B` independent flat tables by the
//! high bits of the hash, giving cache-local growth and shard-wise merging.

pub mod cell;
pub mod flat;
pub mod two_level;

pub use cell::{Cell, ZeroKey, ZERO_KEY_HASH};
pub use flat::{presize_degree, FlatTable};
pub use two_level::{Reserved, TwoLevelTable, DEFAULT_BITS};
