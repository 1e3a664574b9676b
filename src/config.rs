//! Engine configuration constants.
//!
//! Interdependent values live together so a change to one is reviewed
//! against the others:
//!
//! ```text
//! BLOCK_SIZE (16384)
//!       ├─> DATA_HEADER_SIZE (32, fixed by the on-disk format)
//!       ├─> TRAILER_MIN_SIZE (8: one slot + checksum word, 8-aligned)
//!       └─> DATA_FREESIZE (derived: BLOCK_SIZE − 32 − 8 = 16344)
//!             └─> underflow threshold = DATA_FREESIZE / 2
//!
//! DEFAULT_POOL_FRAMES (64)
//!       Tree operations pin at most four pages at once (parent, child,
//!       both siblings), so any capacity ≥ 8 leaves ample headroom.
//! ```

/// Number of page frames the buffer pool holds by default.
pub const DEFAULT_POOL_FRAMES: usize = 64;

/// Smallest pool that still leaves headroom over the deepest pin chain.
pub const MIN_POOL_FRAMES: usize = 8;

const _: () = assert!(DEFAULT_POOL_FRAMES >= MIN_POOL_FRAMES);
