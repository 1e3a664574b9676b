//! File-per-table block I/O.
//!
//! Each table maps to one file, `<name>.tbd`, inside the database
//! directory. Block 0 is the 4 KiB super page; every later block is
//! 16 KiB, so block n ≥ 1 starts at byte `4096 + (n − 1) · 16384`.
//!
//! Reads past the end of file return zeroes: a freshly allocated block
//! has no bytes on disk until its first write-back, and the page layer
//! treats an all-zero page as valid-but-uninitialized.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::page::{BLOCK_SIZE, SUPER_SIZE};

pub const TABLE_FILE_EXTENSION: &str = "tbd";

/// Opens table files on demand and performs block-aligned I/O.
pub struct FileManager {
    dir: PathBuf,
    files: Mutex<HashMap<String, Arc<Mutex<File>>>>,
}

impl FileManager {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.{TABLE_FILE_EXTENSION}"))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.table_path(table).exists()
    }

    fn handle(&self, table: &str) -> Result<Arc<Mutex<File>>> {
        let mut files = self.files.lock();
        if let Some(f) = files.get(table) {
            return Ok(Arc::clone(f));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.table_path(table))?;
        let handle = Arc::new(Mutex::new(file));
        files.insert(table.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Byte length of a block: 4 KiB for the super page, 16 KiB after.
    pub fn block_len(block_id: u32) -> usize {
        if block_id == 0 {
            SUPER_SIZE
        } else {
            BLOCK_SIZE
        }
    }

    fn block_offset(block_id: u32) -> u64 {
        if block_id == 0 {
            0
        } else {
            SUPER_SIZE as u64 + (block_id as u64 - 1) * BLOCK_SIZE as u64
        }
    }

    /// Reads one block, zero-filling anything past the end of file.
    pub fn read_block(&self, table: &str, block_id: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), Self::block_len(block_id));
        let handle = self.handle(table)?;
        let mut file = handle.lock();
        file.seek(SeekFrom::Start(Self::block_offset(block_id)))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Writes one block at its aligned offset, growing the file if
    /// needed (any gap reads back as zeroes).
    pub fn write_block(&self, table: &str, block_id: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), Self::block_len(block_id));
        let handle = self.handle(table)?;
        let mut file = handle.lock();
        file.seek(SeekFrom::Start(Self::block_offset(block_id)))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Flushes a table file to stable storage.
    pub fn sync(&self, table: &str) -> Result<()> {
        let handle = self.handle(table)?;
        let file = handle.lock();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn block_offsets_follow_the_file_format() {
        assert_eq!(FileManager::block_offset(0), 0);
        assert_eq!(FileManager::block_offset(1), 4096);
        assert_eq!(FileManager::block_offset(2), 4096 + 16384);
        assert_eq!(FileManager::block_len(0), SUPER_SIZE);
        assert_eq!(FileManager::block_len(7), BLOCK_SIZE);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        let mut block = vec![0u8; BLOCK_SIZE];
        block[0] = 0xaa;
        block[BLOCK_SIZE - 1] = 0xbb;
        fm.write_block("t", 3, &block).unwrap();

        let mut readback = vec![0u8; BLOCK_SIZE];
        fm.read_block("t", 3, &mut readback).unwrap();
        assert_eq!(readback, block);
    }

    #[test]
    fn read_past_eof_returns_zeroes() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        let mut buf = vec![0xffu8; BLOCK_SIZE];
        fm.read_block("t", 5, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn writing_a_later_block_leaves_gap_blocks_zeroed() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        let block = vec![0x11u8; BLOCK_SIZE];
        fm.write_block("t", 4, &block).unwrap();

        let mut gap = vec![0xffu8; BLOCK_SIZE];
        fm.read_block("t", 2, &mut gap).unwrap();
        assert!(gap.iter().all(|&b| b == 0));
    }

    #[test]
    fn tables_use_separate_files() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        let a = vec![0x01u8; SUPER_SIZE];
        let b = vec![0x02u8; SUPER_SIZE];
        fm.write_block("a", 0, &a).unwrap();
        fm.write_block("b", 0, &b).unwrap();

        let mut readback = vec![0u8; SUPER_SIZE];
        fm.read_block("a", 0, &mut readback).unwrap();
        assert_eq!(readback, a);
        assert!(fm.table_exists("a"));
        assert!(!fm.table_exists("c"));
    }
}
