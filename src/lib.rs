//! Two-level sharded hash table for aggregation pipelines
//!
//! A large key→value mapping split into `2^B` independent sub-tables
//! (shards), routed by the high bits of the key hash. Shards grow on their
//! own, two tables merge shard-by-shard with no cross-shard traffic, and
//! resize latency is paid per shard instead of per table.

pub mod io;
pub mod table;

// Re-export main types
pub use table::{presize_degree, Cell, FlatTable, Reserved, TwoLevelTable, ZeroKey};

/// Table error type
#[derive(Debug, thiserror::Error)]
pub enum AggError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("text codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected {expected:?} in text stream, found {found:?}")]
    UnexpectedByte { expected: char, found: Option<char> },

    #[error("expected a digit in text stream, found {found:?}")]
    MissingDigit { found: Option<char> },

    #[error("number in text stream does not fit in u64")]
    NumberOverflow,
}

pub type Result<T> = std::result::Result<T, AggError>;
