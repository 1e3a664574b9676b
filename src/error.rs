//! Error kinds surfaced by the storage engine.
//!
//! Every fallible operation returns [`Result`]. The variants are the
//! engine's contract with callers: `PageFull` is always recovered
//! internally by a split and never escapes a tree operation; everything
//! else surfaces verbatim. `InvariantViolation` marks bug-class failures
//! (negative free size, descent onto a nonexistent block) that abort the
//! operation without attempting repair.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RowanError>;

#[derive(Debug, Error)]
pub enum RowanError {
    /// Lookup, remove or update could not locate the key.
    #[error("record not found")]
    NotFound,

    /// Insert found the key already present in the leaf.
    #[error("duplicate key")]
    Duplicate,

    /// A page could not hold the record. Recovered by splitting at the
    /// enclosing tree operation; callers of the public API never see it.
    #[error("page full")]
    PageFull,

    /// Magic or checksum mismatch while loading a page.
    #[error("block {block_id} corrupt: {reason}")]
    Corrupt { block_id: u32, reason: String },

    /// Underlying file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Every frame in the buffer pool is pinned.
    #[error("buffer pool exhausted ({capacity} frames, all pinned)")]
    PoolExhausted { capacity: usize },

    /// Relation schema rejected at table create/open.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// A structural invariant does not hold; the operation is aborted.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Returns an `InvariantViolation` unless the condition holds.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::RowanError::InvariantViolation(
                format!($($arg)*),
            ));
        }
    };
}

pub(crate) use invariant;
