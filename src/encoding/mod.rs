//! Byte-order and checksum primitives.
//!
//! Everything the engine writes to disk is big-endian: header scalars,
//! slot offsets and record field bytes. This module holds the two
//! primitives that sit below the page layer — the additive page checksum
//! and the wire-byte helpers — so nothing above it has to reason about
//! host byte order.

pub mod checksum;
pub mod wire;

pub use checksum::{checksum_ok, finalize_checksum, sum32};
pub use wire::{align8, wire_i16, wire_i32, wire_i64, wire_u32, WireBytes};
