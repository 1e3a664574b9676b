//! Clustered B+-tree over slotted pages.
//!
//! The tree's leaves are the table's data pages: records live in the
//! leaves, sorted by the primary-key field, and the leaves are chained
//! left-to-right through their `next` pointers. Internal pages hold
//! `(separator_key, u32 child_id)` records plus one extra child — the
//! leftmost — kept in the page's `next` field, so a page with *n*
//! separators has *n + 1* children.
//!
//! ```text
//!                 [ root: index ]
//!                next /    | k₁ | k₂
//!                    /     |       \
//!            [ leaf ] → [ leaf ] → [ leaf ]     (singly linked)
//! ```
//!
//! ## Routing
//!
//! Descent uses lower-bound search over the separators with an
//! equal-goes-right tie-break: a key equal to separator kᵢ lives in the
//! subtree kᵢ points at, not to its left. Separators are exactly the
//! minimum keys of their subtrees, which borrow and merge rely on when
//! they rewrite boundaries.
//!
//! ## Structural changes
//!
//! Inserts split full pages and propagate a promoted entry
//! `(min_key_of_new_page, new_block_id)` up an explicit descent stack;
//! when the root splits, a fresh root is allocated and the super page's
//! root pointer moves. Removes repair underflowing pages from their
//! parent — first borrowing from the richer sibling, then merging into
//! the emptier neighbor — and shrink the root away once it holds no
//! separators. All operations hold pinned pages through RAII guards,
//! so every borrow is released on every path.

mod rebalance;
mod tree;

pub use tree::Tree;
