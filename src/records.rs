//! Packed record codec and tuple-shape descriptors.
//!
//! A record is a contiguous byte run inside a page's record region:
//!
//! ```text
//! +-----------+--------------+---------------------+------------------+
//! | flags u8  | field_count  | field_len (u16 BE)  | field bytes ...  |
//! |           | u8           | × field_count       | concatenated     |
//! +-----------+--------------+---------------------+------------------+
//! ```
//!
//! The low bit of `flags` is the tombstone: a logically deleted record
//! whose bytes survive until the page compacts. Field bytes are stored
//! exactly as handed in — already wire-ordered — so page-level search
//! can compare them without decoding.
//!
//! [`TupleLayout`] states which field of a page's records is the sort
//! key. Leaves key on the relation's primary-key field; index pages hold
//! `(separator_key, u32 child_id)` tuples keyed on field 0. Passing the
//! layout explicitly keeps "what shape of tuple does this page hold" out
//! of the byte-level code.

use std::cmp::Ordering;

use crate::encoding::WireBytes;
use crate::error::{invariant, Result};
use crate::schema::RelationInfo;
use crate::types::DataType;

/// Low bit of the record flags byte.
pub const TOMBSTONE: u8 = 0x01;

/// Bytes of codec overhead before the length table.
const RECORD_PREFIX: usize = 2;

/// Packed size of a record holding the given fields.
pub fn record_size(fields: &[WireBytes<'_>]) -> usize {
    RECORD_PREFIX + 2 * fields.len() + fields.iter().map(|f| f.len()).sum::<usize>()
}

/// Packs `fields` into `buf` with a clear tombstone flag.
///
/// `buf` must be at least [`record_size`] long; the tail beyond the
/// packed bytes (alignment padding) is left untouched.
pub fn write_record(buf: &mut [u8], fields: &[WireBytes<'_>]) -> Result<()> {
    let need = record_size(fields);
    invariant!(
        buf.len() >= need,
        "record buffer too small: {} < {}",
        buf.len(),
        need
    );
    invariant!(fields.len() <= u8::MAX as usize, "too many fields");

    buf[0] = 0;
    buf[1] = fields.len() as u8;
    let mut len_at = RECORD_PREFIX;
    for f in fields {
        invariant!(f.len() <= u16::MAX as usize, "field too long: {}", f.len());
        buf[len_at..len_at + 2].copy_from_slice(&(f.len() as u16).to_be_bytes());
        len_at += 2;
    }
    let mut data_at = RECORD_PREFIX + 2 * fields.len();
    for f in fields {
        buf[data_at..data_at + f.len()].copy_from_slice(f.as_slice());
        data_at += f.len();
    }
    Ok(())
}

/// Sets the tombstone bit on a packed record.
pub fn mark_tombstone(buf: &mut [u8]) {
    buf[0] |= TOMBSTONE;
}

/// Borrowed view over a packed record.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    data: &'a [u8],
    field_count: usize,
}

impl<'a> RecordView<'a> {
    /// Parses the record header and bounds-checks the field table.
    ///
    /// `data` may be longer than the packed record (slot lengths are
    /// 8-byte aligned); only the declared bytes are consulted.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        invariant!(data.len() >= RECORD_PREFIX, "record shorter than header");
        let field_count = data[1] as usize;
        let table_end = RECORD_PREFIX + 2 * field_count;
        invariant!(
            data.len() >= table_end,
            "record length table truncated: {} < {}",
            data.len(),
            table_end
        );
        let total: usize = (0..field_count)
            .map(|i| {
                let at = RECORD_PREFIX + 2 * i;
                u16::from_be_bytes([data[at], data[at + 1]]) as usize
            })
            .sum();
        invariant!(
            data.len() >= table_end + total,
            "record field bytes truncated"
        );
        Ok(Self { data, field_count })
    }

    pub fn flags(&self) -> u8 {
        self.data[0]
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags() & TOMBSTONE != 0
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    fn field_len(&self, i: usize) -> usize {
        let at = RECORD_PREFIX + 2 * i;
        u16::from_be_bytes([self.data[at], self.data[at + 1]]) as usize
    }

    /// Borrows one field without copying.
    pub fn field(&self, i: usize) -> Result<&'a [u8]> {
        invariant!(
            i < self.field_count,
            "field index {} out of range ({} fields)",
            i,
            self.field_count
        );
        let mut at = RECORD_PREFIX + 2 * self.field_count;
        for j in 0..i {
            at += self.field_len(j);
        }
        let len = self.field_len(i);
        Ok(&self.data[at..at + len])
    }

    /// Copies every field out into owned buffers, in declaration order.
    pub fn owned_fields(&self) -> Result<Vec<Vec<u8>>> {
        (0..self.field_count)
            .map(|i| self.field(i).map(|f| f.to_vec()))
            .collect()
    }

    /// The packed length, before slot alignment.
    pub fn packed_len(&self) -> usize {
        let table_end = RECORD_PREFIX + 2 * self.field_count;
        let total: usize = (0..self.field_count).map(|i| self.field_len(i)).sum();
        table_end + total
    }
}

/// Which field of a page's records is the sort key, and how it orders.
#[derive(Debug, Clone, Copy)]
pub struct TupleLayout {
    pub key_field: usize,
    pub key_type: DataType,
}

impl TupleLayout {
    /// Layout of leaf records: the relation's rows.
    pub fn leaf(info: &RelationInfo) -> Self {
        Self {
            key_field: info.key,
            key_type: info.key_type(),
        }
    }

    /// Layout of index records: `(separator_key, u32 child_id)`.
    pub fn index(info: &RelationInfo) -> Self {
        Self {
            key_field: 0,
            key_type: info.key_type(),
        }
    }

    /// Borrows the key field of a record.
    pub fn key_of<'a>(&self, rec: &RecordView<'a>) -> Result<&'a [u8]> {
        rec.field(self.key_field)
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.key_type.compare(a, b)
    }
}

/// Field index of the child pointer inside an index record.
pub const INDEX_CHILD_FIELD: usize = 1;

/// Reads the `u32` child block id out of an index record.
pub fn child_id_of(rec: &RecordView<'_>) -> Result<u32> {
    let raw = rec.field(INDEX_CHILD_FIELD)?;
    invariant!(raw.len() == 4, "child pointer has width {}", raw.len());
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
