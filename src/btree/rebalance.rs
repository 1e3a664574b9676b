//! Remove with borrow-then-merge rebalancing and root shrink.
//!
//! A page underflows when more than half of its payload capacity is
//! reclaimable. Repair runs on the parent, targeting the child:
//!
//! 1. **Borrow**: the sibling with the smaller `free_size` (the richer
//!    one) lends its boundary record. If lending would underflow the
//!    lender, the attempt is rolled back.
//! 2. **Merge**: the neighbor with the larger `free_size` becomes the
//!    destination; the right page of the pair always folds into the
//!    left so the leaf chain stays a forward list. The parent loses the
//!    separator between the two, which may cascade the repair upward.
//!
//! Separator maintenance leans on the tree invariant that a separator
//! equals the minimum key of its subtree, so boundary keys come from
//! the pages already in hand — no grandchild loads.
//!
//! The root is exempt from underflow; when it ends up with zero
//! separators its sole child becomes the new root and the old block is
//! returned to the table's free list.

use tracing::debug;

use crate::encoding::{align8, wire_u32, WireBytes};
use crate::error::{invariant, Result, RowanError};
use crate::records;
use crate::storage::page::PageType;
use crate::storage::slotted::{InsertOutcome, SlottedPage, SlottedPageMut};

use super::tree::{as_wire, index_entry, record_child, PathEntry, Tree};

impl<'a> Tree<'a> {
    /// Removes the row with this key; `NotFound` if absent.
    pub fn remove(&self, key: WireBytes<'_>) -> Result<()> {
        let key = key.as_slice();
        let layout = self.leaf_layout();
        let (leaf, ancestors) = self.descend(key)?;

        {
            let page = self.table().pin(leaf.block_id)?;
            let mut buf = page.write();
            let mut view = SlottedPageMut::from_page(&mut buf)?;
            if !view.remove_record(key, &layout)? {
                return Err(RowanError::NotFound);
            }
            drop(buf);
            page.mark_dirty();
        }
        self.table()
            .with_super_mut(|h| h.set_records(h.records().saturating_sub(1)))?;

        // The root absorbs any emptiness; nothing to rebalance.
        if ancestors.is_empty() {
            return Ok(());
        }

        if self.page_underflow(leaf.block_id)? {
            let parent = ancestors.last().expect("checked non-empty");
            self.repair(parent.block_id, &leaf)?;
        }

        // Unwind: each ancestor may have lost a separator to a merge
        // below it.
        let mut i = ancestors.len();
        while i > 0 {
            i -= 1;
            let entry = ancestors[i];
            let (slots, under) = {
                let page = self.table().pin(entry.block_id)?;
                let buf = page.read();
                let view = SlottedPage::from_page(&buf)?;
                (view.slot_count(), view.is_underflow())
            };
            if i == 0 {
                if slots == 0 {
                    self.shrink_root(entry.block_id)?;
                }
                break;
            }
            if under {
                self.repair(ancestors[i - 1].block_id, &entry)?;
            }
        }
        Ok(())
    }

    fn page_underflow(&self, block_id: u32) -> Result<bool> {
        let page = self.table().pin(block_id)?;
        let buf = page.read();
        Ok(SlottedPage::from_page(&buf)?.is_underflow())
    }

    fn page_free_size(&self, block_id: u32) -> Result<u16> {
        let page = self.table().pin(block_id)?;
        let buf = page.read();
        Ok(SlottedPage::from_page(&buf)?.free_size())
    }

    /// Borrow first, merge if the lender cannot afford it.
    fn repair(&self, parent_id: u32, child: &PathEntry) -> Result<()> {
        let (left, right) = self.siblings(parent_id, child.parent_slot)?;
        if left.is_none() && right.is_none() {
            // A zero-separator parent offers nothing to repair against;
            // the child stays under-occupied until the parent collapses.
            return Ok(());
        }
        if self.borrow_sibling(parent_id, child, left, right)? {
            return Ok(());
        }
        self.merge_sibling(parent_id, child, left, right)
    }

    /// Adjacent siblings of the child at `child_slot` in the parent.
    fn siblings(
        &self,
        parent_id: u32,
        child_slot: Option<u16>,
    ) -> Result<(Option<u32>, Option<u32>)> {
        let page = self.table().pin(parent_id)?;
        let buf = page.read();
        let view = SlottedPage::from_page(&buf)?;
        let n = view.slot_count();

        let left = match child_slot {
            None => None,
            Some(0) => {
                let id = view.next();
                invariant!(id != 0, "index page {} has no leftmost child", parent_id);
                Some(id)
            }
            Some(i) => Some(record_child(&view.record(i - 1)?)?),
        };
        let right = match child_slot {
            None if n > 0 => Some(record_child(&view.record(0)?)?),
            None => None,
            Some(i) if i + 1 < n => Some(record_child(&view.record(i + 1)?)?),
            Some(_) => None,
        };
        Ok((left, right))
    }

    /// Tries to borrow one boundary record for the child. The sibling
    /// with the smaller free size lends; ties prefer the left.
    fn borrow_sibling(
        &self,
        parent_id: u32,
        child: &PathEntry,
        left: Option<u32>,
        right: Option<u32>,
    ) -> Result<bool> {
        let lf = left.map(|id| self.page_free_size(id)).transpose()?;
        let rf = right.map(|id| self.page_free_size(id)).transpose()?;
        let use_left = match (lf, rf) {
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(r)) => l <= r,
            (None, None) => unreachable!("caller checked for siblings"),
        };
        if use_left {
            self.borrow_from_left(parent_id, child, left.expect("checked"))
        } else {
            self.borrow_from_right(parent_id, child, right.expect("checked"))
        }
    }

    fn borrow_from_left(
        &self,
        parent_id: u32,
        child: &PathEntry,
        left_id: u32,
    ) -> Result<bool> {
        let slot = match child.parent_slot {
            Some(i) => i,
            None => {
                return Err(RowanError::InvariantViolation(
                    "leftmost child cannot borrow from the left".into(),
                ))
            }
        };
        let index_layout = self.index_layout();
        // The separator naming the child doubles as the minimum key of
        // the child's leftmost subtree (needed in the internal case).
        let old_sep = {
            let page = self.table().pin(parent_id)?;
            let buf = page.read();
            SlottedPage::from_page(&buf)?
                .key_at(slot, &index_layout)?
                .to_vec()
        };

        let lender = self.table().pin(left_id)?;
        let childp = self.table().pin(child.block_id)?;
        let mut lb = lender.write();
        let mut lp = SlottedPageMut::from_page(&mut lb)?;
        let mut cb = childp.write();
        let mut cp = SlottedPageMut::from_page(&mut cb)?;
        invariant!(
            lp.page_type() == cp.page_type(),
            "siblings {} and {} differ in page type",
            left_id,
            child.block_id
        );
        if lp.slot_count() == 0 {
            return Ok(false);
        }
        let is_leaf = lp.page_type() == PageType::Data;
        let layout = if is_leaf {
            self.leaf_layout()
        } else {
            index_layout
        };

        // Take the lender's largest record, rolling back on underflow.
        let moved = lp.record(lp.slot_count() - 1)?.owned_fields()?;
        lp.deallocate(lp.slot_count() - 1)?;
        if lp.is_underflow() {
            let w = as_wire(&moved);
            let restored = lp.insert_record(&w, &layout)?;
            invariant!(
                matches!(restored, InsertOutcome::Inserted(_)),
                "failed to roll back a borrow from page {}",
                left_id
            );
            drop(lb);
            lender.mark_dirty();
            return Ok(false);
        }

        let new_sep;
        if is_leaf {
            let w = as_wire(&moved);
            let placed = cp.insert_record(&w, &layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "underflowing leaf {} rejected a borrowed record",
                child.block_id
            );
            new_sep = cp.key_at(0, &layout)?.to_vec();
        } else {
            // The moved entry's child becomes the child's new leftmost
            // pointer; the former leftmost is re-described by the old
            // parent separator.
            invariant!(moved[1].len() == 4, "index record child width");
            let moved_child =
                u32::from_be_bytes([moved[1][0], moved[1][1], moved[1][2], moved[1][3]]);
            let old_next_be = wire_u32(cp.next());
            let entry = index_entry(&old_sep, &old_next_be);
            let placed = cp.insert_record(&entry, &layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "underflowing index page {} rejected a borrowed entry",
                child.block_id
            );
            cp.set_next(moved_child);
            new_sep = moved[0].clone();
        }
        drop(lb);
        drop(cb);
        lender.mark_dirty();
        childp.mark_dirty();

        self.replace_separator(parent_id, slot, &new_sep, child.block_id)?;
        debug!(child = child.block_id, lender = left_id, "borrowed from left sibling");
        Ok(true)
    }

    fn borrow_from_right(
        &self,
        parent_id: u32,
        child: &PathEntry,
        right_id: u32,
    ) -> Result<bool> {
        // Parent record naming the right sibling.
        let slot = child.parent_slot.map_or(0, |i| i + 1);
        let index_layout = self.index_layout();
        let right_sep = {
            let page = self.table().pin(parent_id)?;
            let buf = page.read();
            SlottedPage::from_page(&buf)?
                .key_at(slot, &index_layout)?
                .to_vec()
        };

        let lender = self.table().pin(right_id)?;
        let childp = self.table().pin(child.block_id)?;
        let mut rb = lender.write();
        let mut rp = SlottedPageMut::from_page(&mut rb)?;
        let mut cb = childp.write();
        let mut cp = SlottedPageMut::from_page(&mut cb)?;
        invariant!(
            rp.page_type() == cp.page_type(),
            "siblings {} and {} differ in page type",
            child.block_id,
            right_id
        );
        if rp.slot_count() == 0 {
            return Ok(false);
        }
        let is_leaf = rp.page_type() == PageType::Data;

        if is_leaf {
            let layout = self.leaf_layout();
            let moved = rp.record(0)?.owned_fields()?;
            rp.deallocate(0)?;
            if rp.is_underflow() {
                let w = as_wire(&moved);
                let restored = rp.insert_record(&w, &layout)?;
                invariant!(
                    matches!(restored, InsertOutcome::Inserted(_)),
                    "failed to roll back a borrow from page {}",
                    right_id
                );
                drop(rb);
                lender.mark_dirty();
                return Ok(false);
            }
            let w = as_wire(&moved);
            let placed = cp.insert_record(&w, &layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "underflowing leaf {} rejected a borrowed record",
                child.block_id
            );
            let new_sep = rp.key_at(0, &layout)?.to_vec();
            drop(rb);
            drop(cb);
            lender.mark_dirty();
            childp.mark_dirty();
            self.replace_separator(parent_id, slot, &new_sep, right_id)?;
        } else {
            // Borrow the sibling's leftmost child. Its subtree minimum
            // is the current parent separator for the sibling.
            let moved_child = rp.next();
            invariant!(moved_child != 0, "index page {} has no leftmost child", right_id);
            let first = rp.record(0)?.owned_fields()?;
            invariant!(first[1].len() == 4, "index record child width");
            let c0 = u32::from_be_bytes([first[1][0], first[1][1], first[1][2], first[1][3]]);
            rp.deallocate(0)?;
            rp.set_next(c0);
            if rp.is_underflow() {
                rp.set_next(moved_child);
                let w = as_wire(&first);
                let restored = rp.insert_record(&w, &index_layout)?;
                invariant!(
                    matches!(restored, InsertOutcome::Inserted(_)),
                    "failed to roll back a borrow from page {}",
                    right_id
                );
                drop(rb);
                lender.mark_dirty();
                return Ok(false);
            }
            let moved_be = wire_u32(moved_child);
            let entry = index_entry(&right_sep, &moved_be);
            let placed = cp.insert_record(&entry, &index_layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "underflowing index page {} rejected a borrowed entry",
                child.block_id
            );
            drop(rb);
            drop(cb);
            lender.mark_dirty();
            childp.mark_dirty();
            // The sibling's popped first key is its new subtree minimum.
            self.replace_separator(parent_id, slot, &first[0], right_id)?;
        }
        debug!(child = child.block_id, lender = right_id, "borrowed from right sibling");
        Ok(true)
    }

    /// Rewrites the parent record at `slot` as `(key, child_id)`.
    ///
    /// Keys are fixed-width (enforced at table open), so the reinsert
    /// can never fail for space.
    fn replace_separator(
        &self,
        parent_id: u32,
        slot: u16,
        key: &[u8],
        child_id: u32,
    ) -> Result<()> {
        let parent = self.table().pin(parent_id)?;
        let mut buf = parent.write();
        let mut view = SlottedPageMut::from_page(&mut buf)?;
        view.deallocate(slot)?;
        let child_be = wire_u32(child_id);
        let entry = index_entry(key, &child_be);
        let placed = view.insert_record(&entry, &self.index_layout())?;
        invariant!(
            matches!(placed, InsertOutcome::Inserted(_)),
            "separator replacement failed on index page {}",
            parent_id
        );
        drop(buf);
        parent.mark_dirty();
        Ok(())
    }

    /// Folds the child and a neighbor together, right into left, and
    /// deletes the separator between them from the parent.
    fn merge_sibling(
        &self,
        parent_id: u32,
        child: &PathEntry,
        left: Option<u32>,
        right: Option<u32>,
    ) -> Result<()> {
        let lf = left.map(|id| self.page_free_size(id)).transpose()?;
        let rf = right.map(|id| self.page_free_size(id)).transpose()?;
        // The emptier neighbor absorbs more easily; ties keep the left.
        let fold_into_left = match (lf, rf) {
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(l), Some(r)) => l >= r,
            (None, None) => unreachable!("caller checked for siblings"),
        };
        let (dest_id, source_id, sep_slot) = if fold_into_left {
            let slot = match child.parent_slot {
                Some(i) => i,
                None => {
                    return Err(RowanError::InvariantViolation(
                        "leftmost child cannot fold into a left sibling".into(),
                    ))
                }
            };
            (left.expect("checked"), child.block_id, slot)
        } else {
            (
                child.block_id,
                right.expect("checked"),
                child.parent_slot.map_or(0, |i| i + 1),
            )
        };

        let index_layout = self.index_layout();
        let sep_key = {
            let page = self.table().pin(parent_id)?;
            let buf = page.read();
            let view = SlottedPage::from_page(&buf)?;
            let rec = view.record(sep_slot)?;
            invariant!(
                record_child(&rec)? == source_id,
                "parent separator {} does not name merge source {}",
                sep_slot,
                source_id
            );
            index_layout.key_of(&rec)?.to_vec()
        };

        let dest = self.table().pin(dest_id)?;
        let source = self.table().pin(source_id)?;
        let mut db = dest.write();
        let mut dp = SlottedPageMut::from_page(&mut db)?;
        let mut sb = source.write();
        let mut sp = SlottedPageMut::from_page(&mut sb)?;
        invariant!(
            dp.page_type() == sp.page_type(),
            "merging pages {} and {} of different types",
            dest_id,
            source_id
        );
        let is_leaf = dp.page_type() == PageType::Data;

        // Both halves were chosen for emptiness, but variable-length
        // records make overflow possible in principle; a merge that
        // cannot fit is skipped and the child stays under-occupied.
        let mut incoming: usize = (0..sp.slot_count())
            .map(|i| sp.slot(i).map(|s| s.length as usize))
            .sum::<Result<usize>>()?;
        let mut incoming_slots = sp.slot_count() as usize;
        let zero_child = [0u8; 4];
        if !is_leaf {
            let appended = [WireBytes::new(&sep_key), WireBytes::new(&zero_child)];
            incoming += align8(records::record_size(&appended));
            incoming_slots += 1;
        }
        let dn = dp.slot_count() as usize;
        let trailer_growth = align8((dn + incoming_slots) * 4 + 4) - align8(dn * 4 + 4);
        if (dp.free_size() as usize) < incoming + trailer_growth {
            debug!(
                dest = dest_id,
                source = source_id,
                "merge skipped: contents do not fit"
            );
            return Ok(());
        }

        {
            let parent = self.table().pin(parent_id)?;
            let mut pb = parent.write();
            let mut pp = SlottedPageMut::from_page(&mut pb)?;
            pp.deallocate(sep_slot)?;
            drop(pb);
            parent.mark_dirty();
        }

        let layout = if is_leaf {
            self.leaf_layout()
        } else {
            index_layout
        };
        while sp.slot_count() > 0 {
            let fields = sp.record(0)?.owned_fields()?;
            sp.deallocate(0)?;
            let w = as_wire(&fields);
            let placed = dp.insert_record(&w, &layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "merge destination {} rejected a record",
                dest_id
            );
        }

        if is_leaf {
            invariant!(
                dp.next() == source_id,
                "merged leaves {} and {} are not adjacent",
                dest_id,
                source_id
            );
            dp.set_next(sp.next());
            sp.set_next(0);
        } else {
            let orphan = sp.next();
            invariant!(orphan != 0, "index page {} has no leftmost child", source_id);
            let orphan_be = wire_u32(orphan);
            let entry = index_entry(&sep_key, &orphan_be);
            let placed = dp.insert_record(&entry, &layout)?;
            invariant!(
                matches!(placed, InsertOutcome::Inserted(_)),
                "merge destination {} rejected the leftmost entry",
                dest_id
            );
            sp.set_next(0);
        }
        drop(db);
        drop(sb);
        dest.mark_dirty();
        source.mark_dirty();
        debug!(dest = dest_id, source = source_id, "merged sibling pages");
        Ok(())
    }

    /// Replaces a zero-separator root with its sole child and frees the
    /// old block.
    fn shrink_root(&self, root_id: u32) -> Result<()> {
        let next = {
            let page = self.table().pin(root_id)?;
            let buf = page.read();
            let view = SlottedPage::from_page(&buf)?;
            invariant!(
                view.page_type() == PageType::Index,
                "cannot shrink a leaf root"
            );
            invariant!(view.slot_count() == 0, "root still has separators");
            view.next()
        };
        invariant!(next != 0, "shrinking root {} has no child", root_id);
        self.table().with_super_mut(|h| h.set_root(next))?;
        self.table().deallocate(root_id)?;
        debug!(old = root_id, new = next, "shrank tree root");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POOL_FRAMES;
    use crate::encoding::{wire_i32, wire_i64};
    use crate::schema::{FieldInfo, RelationInfo};
    use crate::storage::{BufferPool, FileManager};
    use crate::table::Table;
    use crate::types::DataType;
    use std::sync::Arc;
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

    fn table() -> (tempfile::TempDir, Table) {
        let dir = tempdir().unwrap();
        let files = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(files, DEFAULT_POOL_FRAMES));
        let table = Table::create(pool, "t", relation(), 1).unwrap();
        (dir, table)
    }

    fn put(table: &Table, key: i64) {
        let k = wire_i64(key);
        let v = wire_i32((key % 1000) as i32);
        table
            .insert(&[WireBytes::new(&k), WireBytes::new(&v)])
            .unwrap();
    }

    fn del(table: &Table, key: i64) -> Result<()> {
        let k = wire_i64(key);
        table.remove(WireBytes::new(&k))
    }

    fn found(table: &Table, key: i64) -> bool {
        let k = wire_i64(key);
        table.search(WireBytes::new(&k)).is_ok()
    }

    #[test]
    fn remove_from_single_leaf() {
        let (_dir, table) = table();
        for key in [3, 5, 7, 11] {
            put(&table, key);
        }
        del(&table, 7).unwrap();
        assert!(!found(&table, 7));
        assert!(found(&table, 5));
        assert_eq!(table.records().unwrap(), 3);
    }

    #[test]
    fn second_remove_is_not_found() {
        let (_dir, table) = table();
        put(&table, 1);
        del(&table, 1).unwrap();
        assert!(matches!(del(&table, 1), Err(RowanError::NotFound)));
        assert_eq!(table.records().unwrap(), 0);
    }

    #[test]
    fn remove_everything_shrinks_back_to_a_leaf_root() {
        let (_dir, table) = table();
        let n = 3000i64;
        for key in 1..=n {
            put(&table, key);
        }
        assert_ne!(table.root().unwrap(), 1, "tree should have grown");

        for key in (1..=n).rev() {
            del(&table, key).unwrap();
        }
        assert_eq!(table.records().unwrap(), 0);

        // The root is a single empty leaf again.
        let root = table.root().unwrap();
        let page = table.pin(root).unwrap();
        let buf = page.read();
        let view = SlottedPage::from_page(&buf).unwrap();
        assert_eq!(view.page_type(), PageType::Data);
        assert_eq!(view.slot_count(), 0);
        assert_eq!(view.next(), 0);
    }

    #[test]
    fn ascending_removal_order_also_rebalances() {
        let (_dir, table) = table();
        let n = 2500i64;
        for key in 1..=n {
            put(&table, key);
        }
        for key in 1..=n {
            del(&table, key).unwrap();
            assert!(!found(&table, key));
        }
        assert_eq!(table.records().unwrap(), 0);
    }

    #[test]
    fn interleaved_inserts_and_removes_stay_consistent() {
        let (_dir, table) = table();
        // Saw-tooth load: grow, shear off a band, regrow.
        for key in 1..=1200i64 {
            put(&table, key);
        }
        for key in 400..=800i64 {
            del(&table, key).unwrap();
        }
        for key in 400..=800i64 {
            put(&table, key);
        }
        for key in 1..=1200i64 {
            assert!(found(&table, key), "key {key} lost");
        }
        assert_eq!(table.records().unwrap(), 1200);
    }

    #[test]
    fn sparse_removal_keeps_survivors_reachable() {
        let (_dir, table) = table();
        for key in 1..=2000i64 {
            put(&table, key);
        }
        for key in (1..=2000i64).filter(|k| k % 3 != 0) {
            del(&table, key).unwrap();
        }
        for key in 1..=2000i64 {
            assert_eq!(found(&table, key), key % 3 == 0, "key {key}");
        }
    }
}
