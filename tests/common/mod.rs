//! Shared fixtures and the tree invariant walker.
#![allow(dead_code)]

use std::sync::Arc;

use rowandb::encoding::checksum_ok;
use rowandb::records::{child_id_of, TupleLayout};
use rowandb::storage::page::{SuperPage, BLOCK_SIZE, PAGE_HEADER_SIZE};
use rowandb::{
    BufferPool, DataType, FieldInfo, FileManager, PageType, RelationInfo, SlottedPage, Table,
    WireBytes,
};

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub files: Arc<FileManager>,
    pub pool: Arc<BufferPool>,
    pub name: Arc<str>,
}

impl Fixture {
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(Arc::clone(&files), 64));
        Self {
            dir,
            files,
            pool,
            name: Arc::from(name),
        }
    }

    pub fn create_table(&self, info: RelationInfo) -> Table {
        Table::create(Arc::clone(&self.pool), &self.name, info, 1).unwrap()
    }
}

/// `(id BIGINT key, value INT)` — the multi-level tests.
pub fn kv_relation() -> RelationInfo {
    RelationInfo::new(
        vec![
            FieldInfo::new("id", DataType::BigInt, 8),
            FieldInfo::new("value", DataType::Int, 4),
        ],
        0,
    )
}

/// `(id BIGINT key, payload VARCHAR)` — the page-accounting tests.
/// A 154-byte payload packs to exactly 168 record bytes.
pub fn payload_relation() -> RelationInfo {
    RelationInfo::new(
        vec![
            FieldInfo::new("id", DataType::BigInt, 8),
            FieldInfo::new("payload", DataType::Varchar, 0),
        ],
        0,
    )
}

pub fn put_kv(table: &Table, key: i64) {
    let k = key.to_be_bytes();
    let v = ((key * 10) as i32).to_be_bytes();
    table
        .insert(&[WireBytes::new(&k), WireBytes::new(&v)])
        .unwrap();
}

pub fn get_kv(table: &Table, key: i64) -> Option<i32> {
    let k = key.to_be_bytes();
    match table.search(WireBytes::new(&k)) {
        Ok(row) => Some(i32::from_be_bytes(row[1].as_slice().try_into().unwrap())),
        Err(_) => None,
    }
}

pub fn put_payload(table: &Table, key: i64, payload: &[u8]) -> rowandb::Result<()> {
    let k = key.to_be_bytes();
    table.insert(&[WireBytes::new(&k), WireBytes::new(payload)])
}

/// Result of one full-tree verification pass.
pub struct TreeCheck {
    /// Leaf block ids in key order.
    pub leaves: Vec<u32>,
    /// Every key in the tree, in order.
    pub keys: Vec<Vec<u8>>,
    pub root: u32,
}

/// Walks the whole tree and asserts the structural invariants: page
/// size identities, strictly ascending keys, the leaf chain, and that
/// every separator is its subtree's minimum key.
pub fn check_tree(fx: &Fixture, info: &RelationInfo) -> TreeCheck {
    let root = {
        let page = fx.pool.pin(&fx.name, 0).unwrap();
        let buf = page.read();
        SuperPage::from_page(&buf).unwrap().root()
    };

    let mut leaves = Vec::new();
    let mut keys = Vec::new();
    check_page(fx, info, root, &mut leaves, &mut keys);

    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "keys are not strictly ascending");
    }

    // The chain from the leftmost leaf visits every leaf in order.
    if !leaves.is_empty() {
        let mut chain = Vec::new();
        let mut cur = leaves[0];
        while cur != 0 {
            chain.push(cur);
            assert!(chain.len() <= leaves.len(), "leaf chain has a cycle");
            let page = fx.pool.pin(&fx.name, cur).unwrap();
            let buf = page.read();
            cur = SlottedPage::from_page(&buf).unwrap().next();
        }
        assert_eq!(chain, leaves, "leaf chain does not match key order");
    }

    TreeCheck { leaves, keys, root }
}

/// Returns the minimum key of the subtree, if it holds any records.
fn check_page(
    fx: &Fixture,
    info: &RelationInfo,
    block_id: u32,
    leaves: &mut Vec<u32>,
    keys: &mut Vec<Vec<u8>>,
) -> Option<Vec<u8>> {
    let page = fx.pool.pin(&fx.name, block_id).unwrap();
    let buf = page.read();
    let view = SlottedPage::from_page(&buf).unwrap();

    // The page's bytes are fully accounted for.
    let live: usize = (0..view.slot_count())
        .map(|i| view.slot(i).unwrap().length as usize)
        .sum();
    assert_eq!(
        live + view.trailer_size() + PAGE_HEADER_SIZE + view.free_size() as usize,
        BLOCK_SIZE,
        "size identity broken on block {block_id}"
    );
    assert!(
        view.free_space() as usize <= BLOCK_SIZE - view.trailer_size(),
        "free-space cursor overruns the trailer on block {block_id}"
    );

    match view.page_type() {
        PageType::Data => {
            leaves.push(block_id);
            let layout = TupleLayout::leaf(info);
            let mut min = None;
            for i in 0..view.slot_count() {
                let key = view.key_at(i, &layout).unwrap().to_vec();
                if i == 0 {
                    min = Some(key.clone());
                }
                keys.push(key);
            }
            min
        }
        PageType::Index => {
            let layout = TupleLayout::index(info);
            let mut subtree_min = None;
            if view.next() != 0 {
                subtree_min = check_page(fx, info, view.next(), leaves, keys);
            }
            for i in 0..view.slot_count() {
                let rec = view.record(i).unwrap();
                let sep = layout.key_of(&rec).unwrap().to_vec();
                let child = child_id_of(&rec).unwrap();
                let child_min = check_page(fx, info, child, leaves, keys);
                // Each separator is the minimum key of its subtree.
                if let Some(child_min) = &child_min {
                    assert_eq!(
                        child_min, &sep,
                        "separator {i} of block {block_id} is not its subtree's min"
                    );
                }
                if subtree_min.is_none() {
                    subtree_min = child_min;
                }
            }
            subtree_min
        }
        other => panic!("unexpected page type {other:?} at block {block_id}"),
    }
}

/// After a flush, every non-empty block on disk verifies its
/// checksum.
pub fn check_checksums(fx: &Fixture) {
    fx.pool.flush_table(&fx.name).unwrap();

    let max_block = {
        let mut buf = vec![0u8; 4096];
        fx.files.read_block(&fx.name, 0, &mut buf).unwrap();
        assert!(checksum_ok(&buf), "super page checksum");
        SuperPage::from_page(&buf).unwrap().header().max_block()
    };
    for block in 1..=max_block {
        let mut buf = vec![0u8; BLOCK_SIZE];
        fx.files.read_block(&fx.name, block, &mut buf).unwrap();
        if buf.iter().any(|&b| b != 0) {
            assert!(checksum_ok(&buf), "checksum of block {block}");
        }
    }
}
