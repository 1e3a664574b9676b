//! Table lifecycle and super-block bookkeeping.
//!
//! A table is one file: block 0 is the super page (tree root pointer,
//! live record count, idle-block free list, allocation counters), block
//! 1 starts life as the empty root leaf. The table hands out and takes
//! back blocks; the tree decides what they contain.
//!
//! CRUD entry points delegate to [`crate::btree::Tree`]; rows and probe
//! keys cross the API as [`WireBytes`] — already big-endian — because
//! every comparison below this point is byte-for-byte.

use std::sync::Arc;

use tracing::info;

use crate::btree::Tree;
use crate::encoding::WireBytes;
use crate::error::{invariant, Result, RowanError};
use crate::schema::RelationInfo;
use crate::storage::page::{PageHeader, PageType, SuperHeader, SuperPage, SuperPageMut};
use crate::storage::slotted::SlottedPageMut;
use crate::storage::{BufferPool, PinnedPage};

pub struct Table {
    name: Arc<str>,
    info: RelationInfo,
    space_id: u32,
    pool: Arc<BufferPool>,
}

impl Table {
    /// Creates the table file: super page at block 0, empty root leaf at
    /// block 1.
    pub fn create(
        pool: Arc<BufferPool>,
        name: &str,
        info: RelationInfo,
        space_id: u32,
    ) -> Result<Self> {
        info.validate()?;
        if pool.files().table_exists(name) {
            return Err(RowanError::Schema(format!(
                "table '{name}' already exists"
            )));
        }
        let table = Self {
            name: Arc::from(name),
            info,
            space_id,
            pool,
        };

        {
            let super_page = table.pin(0)?;
            let mut buf = super_page.write();
            let mut sp = SuperPageMut::clear(&mut buf, space_id)?;
            let header = sp.header_mut();
            header.set_root(1);
            header.set_first(1);
            header.set_max_block(1);
            header.set_data_count(1);
            drop(buf);
            super_page.mark_dirty();
        }
        {
            let root = table.pin(1)?;
            let mut buf = root.write();
            SlottedPageMut::clear(&mut buf, space_id, 1, PageType::Data)?;
            drop(buf);
            root.mark_dirty();
        }
        table.flush()?;
        info!(table = name, space_id, "created table");
        Ok(table)
    }

    /// Opens an existing table, validating the schema and super page.
    pub fn open(pool: Arc<BufferPool>, name: &str, info: RelationInfo) -> Result<Self> {
        info.validate()?;
        invariant!(
            pool.files().table_exists(name),
            "table '{}' does not exist",
            name
        );
        let name: Arc<str> = Arc::from(name);
        let (space_id, root) = {
            let page = pool.pin(&name, 0)?;
            let buf = page.read();
            let sp = SuperPage::from_page(&buf)?;
            (sp.header().space_id(), sp.root())
        };
        invariant!(root != 0, "table '{}' has no root block", name);
        info!(table = %name, space_id, root, "opened table");
        Ok(Self {
            name,
            info,
            space_id,
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &RelationInfo {
        &self.info
    }

    pub fn space_id(&self) -> u32 {
        self.space_id
    }

    pub(crate) fn pin(&self, block_id: u32) -> Result<PinnedPage> {
        self.pool.pin(&self.name, block_id)
    }

    pub(crate) fn with_super<R>(&self, f: impl FnOnce(&SuperHeader) -> R) -> Result<R> {
        let page = self.pin(0)?;
        let buf = page.read();
        let sp = SuperPage::from_page(&buf)?;
        Ok(f(sp.header()))
    }

    pub(crate) fn with_super_mut<R>(&self, f: impl FnOnce(&mut SuperHeader) -> R) -> Result<R> {
        let page = self.pin(0)?;
        let mut buf = page.write();
        let mut sp = SuperPageMut::from_page(&mut buf)?;
        let out = f(sp.header_mut());
        drop(buf);
        page.mark_dirty();
        Ok(out)
    }

    /// Current root block id.
    pub fn root(&self) -> Result<u32> {
        self.with_super(|h| h.root())
    }

    /// Live record count.
    pub fn records(&self) -> Result<u64> {
        self.with_super(|h| h.records())
    }

    /// Hands out a block: reuses the idle-list head, else grows the
    /// file by one block.
    pub fn allocate(&self) -> Result<u32> {
        let idle_head = self.with_super(|h| h.idle())?;

        let block_id = if idle_head != 0 {
            let next = {
                let page = self.pin(idle_head)?;
                let buf = page.read();
                PageHeader::from_bytes(&buf)?.next()
            };
            self.with_super_mut(|h| {
                h.set_idle(next);
                h.set_idle_count(h.idle_count() - 1);
                h.set_data_count(h.data_count() + 1);
            })?;
            idle_head
        } else {
            self.with_super_mut(|h| {
                let id = h.max_block() + 1;
                h.set_max_block(id);
                h.set_data_count(h.data_count() + 1);
                id
            })?
        };
        Ok(block_id)
    }

    /// Returns a block to the idle list.
    pub fn deallocate(&self, block_id: u32) -> Result<()> {
        invariant!(block_id != 0, "cannot deallocate the super block");
        let idle_head = self.with_super(|h| h.idle())?;
        {
            let page = self.pin(block_id)?;
            let mut buf = page.write();
            let mut idle = SlottedPageMut::clear(&mut buf, self.space_id, block_id, PageType::Idle)?;
            idle.set_next(idle_head);
            drop(buf);
            page.mark_dirty();
        }
        self.with_super_mut(|h| {
            h.set_idle(block_id);
            h.set_idle_count(h.idle_count() + 1);
            h.set_data_count(h.data_count().saturating_sub(1));
        })
    }

    /// Writes back every dirty page of this table.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_table(&self.name)
    }

    /// Point lookup; returns the row's fields in wire order.
    pub fn search(&self, key: WireBytes<'_>) -> Result<Vec<Vec<u8>>> {
        Tree::new(self).search(key)
    }

    /// Inserts a row; `Duplicate` if the key exists.
    pub fn insert(&self, fields: &[WireBytes<'_>]) -> Result<()> {
        Tree::new(self).insert(fields)
    }

    /// Removes the row with this key; `NotFound` if absent.
    pub fn remove(&self, key: WireBytes<'_>) -> Result<()> {
        Tree::new(self).remove(key)
    }

    /// Replaces the row with the same key: remove then insert.
    pub fn update(&self, fields: &[WireBytes<'_>]) -> Result<()> {
        Tree::new(self).update(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POOL_FRAMES;
    use crate::schema::FieldInfo;
    use crate::storage::FileManager;
    use crate::types::DataType;
    use tempfile::tempdir;

    fn relation() -> RelationInfo {
        RelationInfo::new(
            vec![
                FieldInfo::new("id", DataType::BigInt, 8),
                FieldInfo::new("value", DataType::Int, 4),
            ],
            0,
        )
    }

    fn fixture() -> (tempfile::TempDir, Arc<BufferPool>) {
        let dir = tempdir().unwrap();
        let files = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(files, DEFAULT_POOL_FRAMES));
        (dir, pool)
    }

    #[test]
    fn create_writes_super_and_root_leaf() {
        let (_dir, pool) = fixture();
        let table = Table::create(Arc::clone(&pool), "users", relation(), 42).unwrap();

        assert_eq!(table.root().unwrap(), 1);
        assert_eq!(table.records().unwrap(), 0);
        table
            .with_super(|h| {
                assert_eq!(h.space_id(), 42);
                assert_eq!(h.first(), 1);
                assert_eq!(h.max_block(), 1);
                assert_eq!(h.data_count(), 1);
                assert_eq!(h.idle(), 0);
            })
            .unwrap();
    }

    #[test]
    fn create_twice_fails() {
        let (_dir, pool) = fixture();
        Table::create(Arc::clone(&pool), "users", relation(), 1).unwrap();
        assert!(matches!(
            Table::create(pool, "users", relation(), 1),
            Err(RowanError::Schema(_))
        ));
    }

    #[test]
    fn open_round_trips_after_flush() {
        let (_dir, pool) = fixture();
        {
            let t = Table::create(Arc::clone(&pool), "users", relation(), 7).unwrap();
            t.flush().unwrap();
        }
        let t = Table::open(pool, "users", relation()).unwrap();
        assert_eq!(t.space_id(), 7);
        assert_eq!(t.root().unwrap(), 1);
    }

    #[test]
    fn allocate_grows_then_reuses_freed_blocks() {
        let (_dir, pool) = fixture();
        let table = Table::create(pool, "t", relation(), 1).unwrap();

        assert_eq!(table.allocate().unwrap(), 2);
        assert_eq!(table.allocate().unwrap(), 3);

        table.deallocate(2).unwrap();
        table.with_super(|h| assert_eq!(h.idle_count(), 1)).unwrap();

        // Free-list head comes back before the file grows again.
        assert_eq!(table.allocate().unwrap(), 2);
        assert_eq!(table.allocate().unwrap(), 4);
        table
            .with_super(|h| {
                assert_eq!(h.idle(), 0);
                assert_eq!(h.idle_count(), 0);
                assert_eq!(h.max_block(), 4);
            })
            .unwrap();
    }

    #[test]
    fn deallocate_chains_multiple_blocks() {
        let (_dir, pool) = fixture();
        let table = Table::create(pool, "t", relation(), 1).unwrap();
        for _ in 0..3 {
            table.allocate().unwrap();
        }
        table.deallocate(2).unwrap();
        table.deallocate(3).unwrap();

        // LIFO: last freed is first reused.
        assert_eq!(table.allocate().unwrap(), 3);
        assert_eq!(table.allocate().unwrap(), 2);
    }

    #[test]
    fn schema_is_validated_on_create() {
        let (_dir, pool) = fixture();
        let bad = RelationInfo::new(
            vec![FieldInfo::new("name", DataType::Varchar, 0)],
            0,
        );
        assert!(matches!(
            Table::create(pool, "bad", bad, 1),
            Err(RowanError::Schema(_))
        ));
    }
}
