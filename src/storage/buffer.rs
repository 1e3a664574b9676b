//! Buffer pool: a fixed set of in-memory page frames with pin counts.
//!
//! Frames are keyed by `(table_name, block_id)`. Every page the engine
//! touches is pinned first and unpinned when the [`PinnedPage`] guard
//! drops, so borrow/release parity — the single most error-prone
//! discipline of the original pointer-based design — holds by
//! construction on every path, early returns included.
//!
//! Loading verifies magic and checksum of any page that is not all
//! zeroes (freshly allocated blocks read back as zeroes until their
//! first write-back). Write-back refreshes the page checksum; that is
//! the one place checksums are finalized, so any page emitted to disk
//! verifies.
//!
//! Eviction is a second-chance sweep: a hand walks the frames, clears
//! `visited` on recently used ones and evicts the first unpinned,
//! unvisited frame, flushing it first if dirty. When every frame is
//! pinned the pool reports exhaustion instead of blocking — the engine
//! is single-threaded, so waiting could only deadlock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::encoding::finalize_checksum;
use crate::error::{Result, RowanError};
use crate::storage::file_manager::FileManager;
use crate::storage::page::verify_on_load;

/// Identity of a cached block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub table: Arc<str>,
    pub block_id: u32,
}

#[derive(Debug)]
struct Frame {
    key: PageKey,
    data: RwLock<Box<[u8]>>,
    pins: AtomicU32,
    visited: AtomicBool,
    dirty: AtomicBool,
}

impl Frame {
    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

/// RAII pin on one page frame.
#[derive(Debug)]
pub struct PinnedPage {
    frame: Arc<Frame>,
}

impl PinnedPage {
    pub fn block_id(&self) -> u32 {
        self.frame.key.block_id
    }

    /// Read access to the frame bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.data.read()
    }

    /// Write access to the frame bytes. The engine is single-threaded;
    /// a scope must not take a second guard on the same frame.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.frame.data.write()
    }

    /// Schedules write-back of this frame.
    pub fn mark_dirty(&self) {
        self.frame.dirty.store(true, Ordering::Release);
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        let prev = self.frame.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin without a matching pin");
    }
}

struct PoolInner {
    frames: HashMap<PageKey, Arc<Frame>>,
    order: Vec<PageKey>,
    hand: usize,
}

/// Fixed-capacity pool of page frames over a [`FileManager`].
pub struct BufferPool {
    files: Arc<FileManager>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new(files: Arc<FileManager>, capacity: usize) -> Self {
        Self {
            files,
            capacity: capacity.max(crate::config::MIN_POOL_FRAMES),
            inner: Mutex::new(PoolInner {
                frames: HashMap::new(),
                order: Vec::new(),
                hand: 0,
            }),
        }
    }

    pub fn files(&self) -> &Arc<FileManager> {
        &self.files
    }

    /// Pins the frame for `(table, block_id)`, loading it on a miss.
    pub fn pin(&self, table: &Arc<str>, block_id: u32) -> Result<PinnedPage> {
        let key = PageKey {
            table: Arc::clone(table),
            block_id,
        };
        let mut inner = self.inner.lock();

        if let Some(frame) = inner.frames.get(&key) {
            frame.pins.fetch_add(1, Ordering::AcqRel);
            frame.visited.store(true, Ordering::Release);
            return Ok(PinnedPage {
                frame: Arc::clone(frame),
            });
        }

        if inner.frames.len() >= self.capacity {
            self.evict_one(&mut inner)?;
        }

        let mut data = vec![0u8; FileManager::block_len(block_id)].into_boxed_slice();
        self.files.read_block(&key.table, block_id, &mut data)?;
        verify_on_load(&data, block_id)?;

        let frame = Arc::new(Frame {
            key: key.clone(),
            data: RwLock::new(data),
            pins: AtomicU32::new(1),
            visited: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
        });
        inner.frames.insert(key.clone(), Arc::clone(&frame));
        inner.order.push(key);
        Ok(PinnedPage { frame })
    }

    fn flush_frame(&self, frame: &Frame) -> Result<()> {
        if !frame.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut data = frame.data.write();
        finalize_checksum(&mut data);
        self.files
            .write_block(&frame.key.table, frame.key.block_id, &data)
    }

    fn evict_one(&self, inner: &mut PoolInner) -> Result<()> {
        let len = inner.order.len();
        for _ in 0..2 * len {
            let pos = inner.hand % len;
            inner.hand = (inner.hand + 1) % len;
            let key = inner.order[pos].clone();
            let frame = match inner.frames.get(&key) {
                Some(f) => Arc::clone(f),
                None => continue,
            };
            if frame.is_pinned() {
                continue;
            }
            if frame.visited.swap(false, Ordering::AcqRel) {
                continue;
            }
            self.flush_frame(&frame)?;
            inner.frames.remove(&key);
            inner.order.remove(pos);
            if inner.hand > pos {
                inner.hand -= 1;
            }
            return Ok(());
        }
        Err(RowanError::PoolExhausted {
            capacity: self.capacity,
        })
    }

    /// Writes back every dirty frame of one table.
    pub fn flush_table(&self, table: &str) -> Result<()> {
        let frames: Vec<Arc<Frame>> = {
            let inner = self.inner.lock();
            inner
                .frames
                .values()
                .filter(|f| &*f.key.table == table)
                .map(Arc::clone)
                .collect()
        };
        for frame in frames {
            self.flush_frame(&frame)?;
        }
        self.files.sync(table)
    }

    /// Writes back every dirty frame.
    pub fn flush_all(&self) -> Result<()> {
        let frames: Vec<Arc<Frame>> = {
            let inner = self.inner.lock();
            inner.frames.values().map(Arc::clone).collect()
        };
        for frame in frames {
            self.flush_frame(&frame)?;
        }
        Ok(())
    }
}
