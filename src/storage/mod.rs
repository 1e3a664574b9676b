//! Storage layer: pages, the slotted-page engine, block I/O and the
//! buffer pool.
//!
//! The layering is strict:
//!
//! ```text
//! btree           descends / splits / rebalances
//!   │
//! slotted         space accounting inside one page
//!   │
//! page            typed header views, checksum, clear
//!   │
//! buffer ── file_manager      pinned frames over block-aligned I/O
//! ```
//!
//! Nothing above `page` ever touches raw offsets; nothing below
//! `slotted` knows what a record is.

pub mod buffer;
pub mod file_manager;
pub mod page;
pub mod slotted;

pub use buffer::{BufferPool, PageKey, PinnedPage};
pub use file_manager::{FileManager, TABLE_FILE_EXTENSION};
pub use page::{
    verify_on_load, PageHeader, PageType, SuperHeader, SuperPage, SuperPageMut, BLOCK_SIZE,
    CHECKSUM_SIZE, DATA_FREESIZE, PAGE_HEADER_SIZE, PAGE_MAGIC, SLOT_SIZE, SUPER_HEADER_SIZE,
    SUPER_SIZE, TRAILER_MIN_SIZE,
};
pub use slotted::{InsertOutcome, Slot, SlottedPage, SlottedPageMut};
