//! Descent, point search and insert with split propagation.

use smallvec::SmallVec;
use tracing::debug;

use crate::encoding::{wire_u32, WireBytes};
use crate::error::{invariant, Result, RowanError};
use crate::records::{self, child_id_of, RecordView, TupleLayout};
use crate::storage::page::PageType;
use crate::storage::slotted::{InsertOutcome, SlottedPage, SlottedPageMut};
use crate::table::Table;

/// Upper bound on tree height; a deeper descent means a pointer cycle.
const MAX_DEPTH: usize = 64;

/// One level of the descent: a block and its slot in the parent.
/// `parent_slot == None` means the block was reached through the
/// parent's leftmost-child pointer (`next`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathEntry {
    pub block_id: u32,
    pub parent_slot: Option<u16>,
}

/// A B+-tree bound to one table.
pub struct Tree<'a> {
    table: &'a Table,
}

impl<'a> Tree<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table }
    }

    pub(crate) fn table(&self) -> &Table {
        self.table
    }

    pub(crate) fn leaf_layout(&self) -> TupleLayout {
        TupleLayout::leaf(self.table.info())
    }

    pub(crate) fn index_layout(&self) -> TupleLayout {
        TupleLayout::index(self.table.info())
    }

    /// Picks the child to descend into from an index page.
    ///
    /// Equal keys go right: a probe equal to a separator descends into
    /// that separator's own child. A page with no separators (transient
    /// during a merge, or a shrunk-but-not-yet-collapsed root) routes
    /// through its leftmost pointer.
    pub(crate) fn route(
        &self,
        view: &SlottedPage<'_>,
        key: &[u8],
    ) -> Result<(u32, Option<u16>)> {
        let layout = self.index_layout();
        let n = view.slot_count();
        if n == 0 {
            let child = view.next();
            invariant!(child != 0, "empty index page {} has no child", view.self_id());
            return Ok((child, None));
        }
        let r = view.search_record(key, &layout)?;
        if r >= n {
            let rec = view.record(n - 1)?;
            return Ok((child_id_of(&rec)?, Some(n - 1)));
        }
        let rec = view.record(r)?;
        let sep = layout.key_of(&rec)?;
        if sep == key {
            Ok((child_id_of(&rec)?, Some(r)))
        } else if r > 0 {
            let rec = view.record(r - 1)?;
            Ok((child_id_of(&rec)?, Some(r - 1)))
        } else {
            let child = view.next();
            invariant!(
                child != 0,
                "index page {} has no leftmost child",
                view.self_id()
            );
            Ok((child, None))
        }
    }

    /// Walks from the root to the leaf responsible for `key`.
    ///
    /// Returns the leaf's path entry and the stack of index ancestors,
    /// root first.
    pub(crate) fn descend(&self, key: &[u8]) -> Result<(PathEntry, Vec<PathEntry>)> {
        let root = self.table.root()?;
        let mut ancestors: Vec<PathEntry> = Vec::new();
        let mut cur = PathEntry {
            block_id: root,
            parent_slot: None,
        };
        for _ in 0..MAX_DEPTH {
            let page = self.table.pin(cur.block_id)?;
            let buf = page.read();
            let view = SlottedPage::from_page(&buf)?;
            match view.page_type() {
                PageType::Data => return Ok((cur, ancestors)),
                PageType::Index => {
                    let (child, slot) = self.route(&view, key)?;
                    ancestors.push(cur);
                    cur = PathEntry {
                        block_id: child,
                        parent_slot: slot,
                    };
                }
                other => invariant!(
                    false,
                    "descent reached a {:?} page at block {}",
                    other,
                    cur.block_id
                ),
            }
        }
        Err(RowanError::InvariantViolation(
            "descent exceeded the maximum tree height".into(),
        ))
    }

    /// Point lookup. Returns the row's fields in wire order.
    pub fn search(&self, key: WireBytes<'_>) -> Result<Vec<Vec<u8>>> {
        let key = key.as_slice();
        let (leaf, _) = self.descend(key)?;
        let page = self.table.pin(leaf.block_id)?;
        let buf = page.read();
        let view = SlottedPage::from_page(&buf)?;
        let layout = self.leaf_layout();

        let r = view.search_record(key, &layout)?;
        if r >= view.slot_count() {
            return Err(RowanError::NotFound);
        }
        let rec = view.record(r)?;
        if layout.key_of(&rec)? != key {
            return Err(RowanError::NotFound);
        }
        rec.owned_fields()
    }

    /// Inserts a row, splitting as needed. `Duplicate` if the key exists.
    pub fn insert(&self, fields: &[WireBytes<'_>]) -> Result<()> {
        let info = self.table.info();
        invariant!(
            fields.len() == info.fields.len(),
            "row has {} fields, relation has {}",
            fields.len(),
            info.fields.len()
        );
        let layout = self.leaf_layout();
        let key = fields[layout.key_field].as_slice();
        let (leaf, ancestors) = self.descend(key)?;

        let outcome = {
            let page = self.table.pin(leaf.block_id)?;
            let mut buf = page.write();
            let mut view = SlottedPageMut::from_page(&mut buf)?;
            let outcome = view.insert_record(fields, &layout)?;
            drop(buf);
            if matches!(outcome, InsertOutcome::Inserted(_)) {
                page.mark_dirty();
            }
            outcome
        };

        match outcome {
            InsertOutcome::Inserted(_) => {}
            InsertOutcome::Duplicate => return Err(RowanError::Duplicate),
            InsertOutcome::PageFull(at) => {
                self.insert_with_split(leaf.block_id, at, fields, &ancestors)?;
            }
        }
        self.table
            .with_super_mut(|h| h.set_records(h.records() + 1))?;
        Ok(())
    }

    /// Remove-then-insert; both through the usual paths, no
    /// short-circuit and no atomicity.
    pub fn update(&self, fields: &[WireBytes<'_>]) -> Result<()> {
        let layout = self.leaf_layout();
        let key = fields[layout.key_field];
        self.remove(key)?;
        self.insert(fields)
    }

    /// Splits the leaf, places the row, then pushes promoted entries up
    /// the ancestor stack, splitting index pages until one absorbs the
    /// entry or the root itself splits.
    fn insert_with_split(
        &self,
        leaf_id: u32,
        at: u16,
        fields: &[WireBytes<'_>],
        ancestors: &[PathEntry],
    ) -> Result<()> {
        let leaf_layout = self.leaf_layout();
        let index_layout = self.index_layout();

        let rec_size = records::record_size(fields);
        let (new_id, included) = self.split_page(leaf_id, rec_size, at, PageType::Data)?;

        let mut promoted_key: Vec<u8>;
        {
            let old = self.table.pin(leaf_id)?;
            let new = self.table.pin(new_id)?;
            let mut ob = old.write();
            let mut op = SlottedPageMut::from_page(&mut ob)?;
            let mut nb = new.write();
            let mut np = SlottedPageMut::from_page(&mut nb)?;

            // Chain fixup before anything can fail: the new leaf takes
            // over the old successor.
            np.set_next(op.next());
            op.set_next(new_id);

            let target = if included { &mut op } else { &mut np };
            let placed = target.insert_record(fields, &leaf_layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "post-split leaf rejected the record: {:?}",
                placed
            );

            promoted_key = np.key_at(0, &leaf_layout)?.to_vec();
            drop(ob);
            drop(nb);
            old.mark_dirty();
            new.mark_dirty();
        }
        let mut promoted_child = new_id;

        let mut level = ancestors.len();
        loop {
            if level == 0 {
                return self.grow_root(&promoted_key, promoted_child);
            }
            let parent_id = ancestors[level - 1].block_id;
            let child_be = wire_u32(promoted_child);
            let entry = [WireBytes::new(&promoted_key), WireBytes::new(&child_be)];

            let outcome = {
                let parent = self.table.pin(parent_id)?;
                let mut buf = parent.write();
                let mut view = SlottedPageMut::from_page(&mut buf)?;
                let outcome = view.insert_record(&entry, &index_layout)?;
                drop(buf);
                if matches!(outcome, InsertOutcome::Inserted(_)) {
                    parent.mark_dirty();
                }
                outcome
            };

            match outcome {
                InsertOutcome::Inserted(_) => return Ok(()),
                InsertOutcome::Duplicate => {
                    return Err(RowanError::InvariantViolation(format!(
                        "separator already present in index page {parent_id}"
                    )))
                }
                InsertOutcome::PageFull(pat) => {
                    let entry_size = records::record_size(&entry);
                    let (split_id, inc) =
                        self.split_page(parent_id, entry_size, pat, PageType::Index)?;

                    {
                        let old = self.table.pin(parent_id)?;
                        let new = self.table.pin(split_id)?;
                        let mut ob = old.write();
                        let mut op = SlottedPageMut::from_page(&mut ob)?;
                        let mut nb = new.write();
                        let mut np = SlottedPageMut::from_page(&mut nb)?;

                        let target = if inc { &mut op } else { &mut np };
                        let placed = target.insert_record(&entry, &index_layout)?;
                        invariant!(
                            matches!(placed, InsertOutcome::Inserted(_)),
                            "post-split index page rejected the separator: {:?}",
                            placed
                        );

                        // Normalize: the new page's first separator moves
                        // up; its child becomes the leftmost pointer, so
                        // every index page keeps n + 1 children.
                        let first = np.record(0)?;
                        let k0 = index_layout.key_of(&first)?.to_vec();
                        let c0 = child_id_of(&first)?;
                        np.deallocate(0)?;
                        np.set_next(c0);

                        promoted_key = k0;
                        drop(ob);
                        drop(nb);
                        old.mark_dirty();
                        new.mark_dirty();
                    }
                    promoted_child = split_id;
                    level -= 1;
                }
            }
        }
    }

    /// Moves the upper half of a page into a freshly allocated one.
    ///
    /// `rec_size`/`at` describe the incoming record so the balance point
    /// accounts for it. Returns the new block id and whether the record
    /// belongs in the retained prefix.
    pub(crate) fn split_page(
        &self,
        page_id: u32,
        rec_size: usize,
        at: u16,
        ty: PageType,
    ) -> Result<(u32, bool)> {
        let new_id = self.table.allocate()?;
        let old = self.table.pin(page_id)?;
        let new = self.table.pin(new_id)?;

        let mut ob = old.write();
        let mut op = SlottedPageMut::from_page(&mut ob)?;
        let mut nb = new.write();
        let mut np = SlottedPageMut::clear(&mut nb, self.table.space_id(), new_id, ty)?;

        let (pos, included) = op.split_position(rec_size, at)?;
        // Records move in key order, always from `pos`: deallocation
        // shifts the suffix down one slot each round.
        while op.slot_count() > pos {
            let bytes = {
                let view = op.as_ref();
                view.record_bytes(pos)?.to_vec()
            };
            let copied = np.copy_record(&bytes)?;
            invariant!(copied, "fresh page {} cannot take a split record", new_id);
            op.deallocate(pos)?;
        }

        drop(ob);
        drop(nb);
        old.mark_dirty();
        new.mark_dirty();
        debug!(page = page_id, new = new_id, at = pos, "split page");
        Ok((new_id, included))
    }

    /// Allocates a new root above the old one after a root split.
    fn grow_root(&self, promoted_key: &[u8], promoted_child: u32) -> Result<()> {
        let old_root = self.table.root()?;
        let new_root = self.table.allocate()?;
        {
            let page = self.table.pin(new_root)?;
            let mut buf = page.write();
            let mut view =
                SlottedPageMut::clear(&mut buf, self.table.space_id(), new_root, PageType::Index)?;
            view.set_next(old_root);
            let child_be = wire_u32(promoted_child);
            let entry = [WireBytes::new(promoted_key), WireBytes::new(&child_be)];
            let placed = view.insert_record(&entry, &self.index_layout())?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "fresh root rejected its separator"
            );
            drop(buf);
            page.mark_dirty();
        }
        self.table.with_super_mut(|h| h.set_root(new_root))?;
        debug!(old_root, new_root, "grew tree root");
        Ok(())
    }

}

/// Builds the two-field wire row of an index entry.
pub(crate) fn index_entry<'x>(key: &'x [u8], child_be: &'x [u8; 4]) -> [WireBytes<'x>; 2] {
    [WireBytes::new(key), WireBytes::new(child_be)]
}

/// Reads the child pointer of an index record already in hand.
pub(crate) fn record_child(rec: &RecordView<'_>) -> Result<u32> {
    child_id_of(rec)
}

/// Owned fields → borrowed wire row, for records that migrate pages.
pub(crate) fn as_wire(fields: &[Vec<u8>]) -> SmallVec<[WireBytes<'_>; 4]> {
    fields.iter().map(|f| WireBytes::new(f)).collect()
}
