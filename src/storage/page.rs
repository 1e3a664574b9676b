//! Page types and on-disk header layout.
//!
//! Every block starts with a common 12-byte prefix (magic, space id,
//! type, free-space cursor) followed by a type-specific header. All
//! multi-byte fields are big-endian on disk; the header structs store
//! them as `zerocopy::big_endian` scalars so a header reference is a
//! view straight into the page buffer — no copy, no host-order shadow.
//!
//! ## Data/index page (16 KiB)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  -----------------------------------------
//! 0       4     magic        "db01"
//! 4       4     space_id     table space id
//! 8       2     page_type    idle/super/data/index/meta/log
//! 10      2     free_space   offset of first byte past the records
//! 12      4     next         chain pointer (leaf chain / leftmost child)
//! 16      8     stamp        creation timestamp, microseconds
//! 24      2     slot_count   slots in the trailer
//! 26      2     free_size    reclaimable bytes (incl. tombstones)
//! 28      4     self_id      this block's id
//! ```
//!
//! The rest of the page is `[records ↓][free space][slots ↑][checksum]`;
//! the slot array and checksum word are managed by the slotted-page
//! engine.
//!
//! ## Super page (4 KiB, always block 0)
//!
//! Adds the table's durable bookkeeping after the common prefix: record
//! count, head of the data chain, idle-block free list, allocation
//! counters and — the tree's entry point — the root block id.
//!
//! Idle blocks reuse the data header layout (their `next` field is at
//! the same offset), so the free list needs no layout of its own.

use zerocopy::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::be_accessors;
use crate::encoding::{checksum_ok, finalize_checksum};
use crate::error::{invariant, Result, RowanError};

/// Super page size: block 0 of every table file.
pub const SUPER_SIZE: usize = 4096;
/// Size of every other block.
pub const BLOCK_SIZE: usize = 16384;

/// Four ASCII bytes at offset 0 of every page.
pub const PAGE_MAGIC: [u8; 4] = *b"db01";

pub const SLOT_SIZE: usize = 4;
pub const CHECKSUM_SIZE: usize = 4;
pub const PAGE_HEADER_SIZE: usize = 32;
pub const SUPER_HEADER_SIZE: usize = 60;
/// Trailer of an empty page: the checksum word, 8-byte aligned.
pub const TRAILER_MIN_SIZE: usize = 8;

/// Free size of a freshly cleared data page.
pub const DATA_FREESIZE: u16 = (BLOCK_SIZE - PAGE_HEADER_SIZE - TRAILER_MIN_SIZE) as u16;

const _: () = assert!(DATA_FREESIZE == 16344);

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Idle = 0,
    Super = 1,
    Data = 2,
    Index = 3,
    Meta = 4,
    Log = 5,
}

impl PageType {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(PageType::Idle),
            1 => Some(PageType::Super),
            2 => Some(PageType::Data),
            3 => Some(PageType::Index),
            4 => Some(PageType::Meta),
            5 => Some(PageType::Log),
            _ => None,
        }
    }
}

/// Header of data, index, meta and idle pages.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    magic: [u8; 4],
    space_id: U32,
    page_type: U16,
    free_space: U16,
    next: U32,
    stamp: U64,
    slot_count: U16,
    free_size: U16,
    self_id: U32,
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        invariant!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {}",
            data.len()
        );
        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| RowanError::InvariantViolation(format!("bad PageHeader: {e:?}")))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        invariant!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {}",
            data.len()
        );
        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| RowanError::InvariantViolation(format!("bad PageHeader: {e:?}")))
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    pub fn set_magic(&mut self) {
        self.magic = PAGE_MAGIC;
    }

    pub fn page_type(&self) -> Option<PageType> {
        PageType::from_code(self.page_type.get())
    }

    pub fn set_page_type(&mut self, ty: PageType) {
        self.page_type = U16::new(ty as u16);
    }

    be_accessors! {
        space_id: u32,
        free_space: u16,
        next: u32,
        stamp: u64,
        slot_count: u16,
        free_size: u16,
        self_id: u32,
    }
}

/// Header of the super page (block 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SuperHeader {
    magic: [u8; 4],
    space_id: U32,
    page_type: U16,
    free_space: U16,
    stamp: U64,
    records: U64,
    first: U32,
    idle: U32,
    data_count: U32,
    idle_count: U32,
    self_id: U32,
    max_block: U32,
    pad: U32,
    root: U32,
}

const _: () = assert!(std::mem::size_of::<SuperHeader>() == SUPER_HEADER_SIZE);

impl SuperHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        invariant!(
            data.len() >= SUPER_HEADER_SIZE,
            "buffer too small for SuperHeader: {}",
            data.len()
        );
        Self::ref_from_bytes(&data[..SUPER_HEADER_SIZE])
            .map_err(|e| RowanError::InvariantViolation(format!("bad SuperHeader: {e:?}")))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        invariant!(
            data.len() >= SUPER_HEADER_SIZE,
            "buffer too small for SuperHeader: {}",
            data.len()
        );
        Self::mut_from_bytes(&mut data[..SUPER_HEADER_SIZE])
            .map_err(|e| RowanError::InvariantViolation(format!("bad SuperHeader: {e:?}")))
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    pub fn set_magic(&mut self) {
        self.magic = PAGE_MAGIC;
    }

    pub fn page_type(&self) -> Option<PageType> {
        PageType::from_code(self.page_type.get())
    }

    pub fn set_page_type(&mut self, ty: PageType) {
        self.page_type = U16::new(ty as u16);
    }

    be_accessors! {
        space_id: u32,
        free_space: u16,
        stamp: u64,
        records: u64,
        first: u32,
        idle: u32,
        data_count: u32,
        idle_count: u32,
        self_id: u32,
        max_block: u32,
        root: u32,
    }
}

/// Read-only view of a super page.
#[derive(Debug)]
pub struct SuperPage<'a> {
    data: &'a [u8],
}

impl<'a> SuperPage<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        invariant!(
            data.len() == SUPER_SIZE,
            "super page has size {}",
            data.len()
        );
        let header = SuperHeader::from_bytes(data)?;
        invariant!(header.magic() == PAGE_MAGIC, "super page magic mismatch");
        invariant!(
            header.page_type() == Some(PageType::Super),
            "block 0 is not a super page"
        );
        Ok(Self { data })
    }

    pub fn header(&self) -> &SuperHeader {
        SuperHeader::from_bytes(self.data).expect("validated in from_page")
    }

    pub fn root(&self) -> u32 {
        self.header().root()
    }

    pub fn records(&self) -> u64 {
        self.header().records()
    }

    pub fn checksum_ok(&self) -> bool {
        checksum_ok(self.data)
    }
}

/// Mutable view of a super page.
pub struct SuperPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> SuperPageMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        SuperPage::from_page(data)?;
        Ok(Self { data })
    }

    /// Initializes block 0: zeroes the buffer, writes the header and
    /// finalizes the checksum.
    pub fn clear(data: &'a mut [u8], space_id: u32) -> Result<Self> {
        invariant!(
            data.len() == SUPER_SIZE,
            "super page has size {}",
            data.len()
        );
        data.fill(0);
        let header = SuperHeader::from_bytes_mut(data)?;
        header.set_magic();
        header.set_space_id(space_id);
        header.set_page_type(PageType::Super);
        header.set_stamp(now_micros());
        header.set_free_space(SUPER_HEADER_SIZE as u16);
        finalize_checksum(data);
        Ok(Self { data })
    }

    pub fn header(&self) -> &SuperHeader {
        SuperHeader::from_bytes(self.data).expect("validated on construction")
    }

    pub fn header_mut(&mut self) -> &mut SuperHeader {
        SuperHeader::from_bytes_mut(self.data).expect("validated on construction")
    }

    pub fn finalize_checksum(&mut self) {
        finalize_checksum(self.data);
    }
}

/// Checks a freshly loaded block before it enters the buffer pool.
///
/// All-zero pages pass: a block allocated past the old end of file reads
/// back as zeroes until its first write-back.
pub fn verify_on_load(data: &[u8], block_id: u32) -> Result<()> {
    if data.iter().all(|&b| b == 0) {
        return Ok(());
    }
    if data[..4] != PAGE_MAGIC {
        return Err(RowanError::Corrupt {
            block_id,
            reason: format!("bad magic {:02x?}", &data[..4]),
        });
    }
    if !checksum_ok(data) {
        return Err(RowanError::Corrupt {
            block_id,
            reason: "checksum mismatch".into(),
        });
    }
    Ok(())
}

/// Creation timestamp written into page headers.
pub(crate) fn now_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
