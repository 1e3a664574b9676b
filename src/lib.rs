//! # rowandb — slotted-page table store with a clustered B+-tree
//!
//! rowandb is the storage engine core of a single-node relational table
//! store. Each table is one file of fixed-size blocks: a 4 KiB super
//! page at block 0 and 16 KiB slotted pages after it. Rows live in the
//! leaves of a clustered B+-tree keyed on the table's primary key;
//! internal pages index the leaves with `(separator, child)` records.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use rowandb::{
//!     BufferPool, DataType, FieldInfo, FileManager, RelationInfo, Table, WireBytes,
//! };
//!
//! let files = Arc::new(FileManager::new("./db")?);
//! let pool = Arc::new(BufferPool::new(files, 64));
//! let info = RelationInfo::new(
//!     vec![
//!         FieldInfo::new("id", DataType::BigInt, 8),
//!         FieldInfo::new("name", DataType::Varchar, 0),
//!     ],
//!     0,
//! );
//! let table = Table::create(pool, "users", info, 1)?;
//!
//! let id = 42i64.to_be_bytes();
//! table.insert(&[WireBytes::new(&id), WireBytes::new(b"alice")])?;
//! let row = table.search(WireBytes::new(&id))?;
//! ```
//!
//! All field bytes cross the API in wire (big-endian) order; the
//! [`WireBytes`] newtype marks that contract at the call site.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Table (CRUD, super block)     │
//! ├──────────────────────────────────────┤
//! │   B+-tree (descent, split, merge)    │
//! ├──────────────────────────────────────┤
//! │  Records (packed tuples, tombstones) │
//! ├──────────────────────────────────────┤
//! │  Slotted pages (space management)    │
//! ├──────────────────────────────────────┤
//! │  Buffer pool (pins) ─ File manager   │
//! └──────────────────────────────────────┘
//! ```
//!
//! The engine is single-threaded cooperative: operations run on the
//! caller's context, and the only blocking points are page loads.
//! Concurrency control, transactions and logging are out of scope.

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod encoding;
pub mod error;
pub mod records;
pub mod schema;
pub mod storage;
pub mod table;
pub mod types;

pub use btree::Tree;
pub use encoding::WireBytes;
pub use error::{Result, RowanError};
pub use schema::{FieldInfo, RelationInfo};
pub use storage::{BufferPool, FileManager, PageType, SlottedPage, SlottedPageMut};
pub use table::Table;
pub use types::DataType;
