//! Trie node representation and the `search` descent.
//!
//! A node is either an internal table (a sparse bitmap plus a densely
//! packed children array) or a leaf (an owned key/value pair), discriminated
//! by an ordinary two-arm enum rather than pointer-bit tagging.
//!
//! Structural sharing is via [`std::rc::Rc`]. Plain `Rc`, not `Arc`: the
//! trie is single-threaded by design, so atomic refcounting would be pure
//! overhead.

use std::cell::RefCell;
use std::hash::Hash;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::alloc::slab::TableCache;
use crate::error::HamtError;

use super::hash::HashCarrier;

/// The table cache backing every table node's children array, shared by
/// every version of a trie family (ephemeral mutations and every
/// persistent descendant created via `pset`/`premove` reuse the same
/// cache). The `RefCell` lets the cache be mutated through a shared `Rc`
/// handle; since the trie is single-threaded there is never more than one
/// borrow live at a time.
pub(crate) type SharedTableCache<K, V> = Rc<RefCell<TableCache<Rc<HamtNode<K, V>>>>>;

/// A trie node: either an internal table (a sparse bitmap plus a densely
/// packed children array) or a leaf (an owned key/value pair).
pub(crate) enum HamtNode<K, V> {
    Table(TableNode<K, V>),
    Leaf(K, V),
}

/// An internal table node: a 32-bit sparse bitmap recording which of 32
/// child slots are populated, plus a contiguous, densely packed array of
/// child nodes whose length is exactly the bitmap's population count.
pub(crate) struct TableNode<K, V> {
    bitmap: u32,
    children: NonNull<Rc<HamtNode<K, V>>>,
    cache: SharedTableCache<K, V>,
}

impl<K, V> TableNode<K, V> {
    /// The empty table: only valid as the root of an empty trie (every
    /// other table has at least one child).
    pub(crate) fn new_empty(cache: &SharedTableCache<K, V>) -> Self {
        TableNode { bitmap: 0, children: NonNull::dangling(), cache: Rc::clone(cache) }
    }

    pub(crate) fn width(&self) -> usize {
        self.bitmap.count_ones() as usize
    }

    pub(crate) fn has_child(&self, sparse: u32) -> bool {
        self.bitmap & (1 << sparse) != 0
    }

    /// Dense index of sparse slot `sparse`: `popcount(bitmap & ((1<<i)-1))`.
    pub(crate) fn dense_index(&self, sparse: u32) -> usize {
        (self.bitmap & ((1u32 << sparse) - 1)).count_ones() as usize
    }

    pub(crate) fn children(&self) -> &[Rc<HamtNode<K, V>>] {
        let width = self.width();
        if width == 0 {
            &[]
        } else {
            // SAFETY: `children` points at `width` initialized records,
            // established by whichever constructor built this table and
            // maintained for its whole lifetime (only `Drop` ever
            // invalidates them, and only after the last read).
            unsafe { std::slice::from_raw_parts(self.children.as_ptr(), width) }
        }
    }

    fn alloc_row(cache: &SharedTableCache<K, V>, width: usize) -> Result<NonNull<Rc<HamtNode<K, V>>>, HamtError> {
        Ok(cache.borrow_mut().alloc(width)?)
    }

    /// A single-child table (the innermost step of `split`).
    pub(crate) fn singleton(
        cache: &SharedTableCache<K, V>,
        sparse: u32,
        child: Rc<HamtNode<K, V>>,
    ) -> Result<Self, HamtError> {
        let ptr = Self::alloc_row(cache, 1)?;
        // SAFETY: `ptr` is freshly allocated for exactly 1 record.
        unsafe {
            ptr::write(ptr.as_ptr(), child);
        }
        Ok(TableNode { bitmap: 1 << sparse, children: ptr, cache: Rc::clone(cache) })
    }

    /// A two-child table (the base case of `split`).
    pub(crate) fn with_two(
        cache: &SharedTableCache<K, V>,
        lo: u32,
        lo_child: Rc<HamtNode<K, V>>,
        hi: u32,
        hi_child: Rc<HamtNode<K, V>>,
    ) -> Result<Self, HamtError> {
        debug_assert!(lo != hi, "split must diverge on distinct sparse indices");
        let ptr = Self::alloc_row(cache, 2)?;
        // SAFETY: `ptr` is freshly allocated for exactly 2 records.
        unsafe {
            ptr::write(ptr.as_ptr(), lo_child);
            ptr::write(ptr.as_ptr().add(1), hi_child);
        }
        Ok(TableNode { bitmap: (1 << lo) | (1 << hi), children: ptr, cache: Rc::clone(cache) })
    }

    /// `extend`: a new child array one wider than `old`'s, with `new_child`
    /// inserted at its compact position.
    pub(crate) fn extended(
        cache: &SharedTableCache<K, V>,
        old: &TableNode<K, V>,
        sparse: u32,
        new_child: Rc<HamtNode<K, V>>,
    ) -> Result<Self, HamtError>
    where
        K: Clone,
        V: Clone,
    {
        let old_width = old.width();
        let new_width = old_width + 1;
        let dense = old.dense_index(sparse);
        let ptr = Self::alloc_row(cache, new_width)?;
        // SAFETY: `ptr` is freshly allocated for exactly `new_width`
        // records; every index in 0..new_width is written exactly once.
        unsafe {
            for i in 0..dense {
                ptr::write(ptr.as_ptr().add(i), Rc::clone(&old.children()[i]));
            }
            ptr::write(ptr.as_ptr().add(dense), new_child);
            for i in dense..old_width {
                ptr::write(ptr.as_ptr().add(i + 1), Rc::clone(&old.children()[i]));
            }
        }
        Ok(TableNode { bitmap: old.bitmap | (1 << sparse), children: ptr, cache: Rc::clone(cache) })
    }

    /// `shrink`: a new child array one narrower than `old`'s, with the
    /// `sparse` slot removed.
    pub(crate) fn shrunk(cache: &SharedTableCache<K, V>, old: &TableNode<K, V>, sparse: u32) -> Result<Self, HamtError> {
        let old_width = old.width();
        let new_width = old_width - 1;
        let dense = old.dense_index(sparse);
        let children = if new_width == 0 {
            NonNull::dangling()
        } else {
            let ptr = Self::alloc_row(cache, new_width)?;
            // SAFETY: `ptr` is freshly allocated for exactly `new_width`
            // records; every index in 0..new_width is written exactly once.
            unsafe {
                for i in 0..dense {
                    ptr::write(ptr.as_ptr().add(i), Rc::clone(&old.children()[i]));
                }
                for i in (dense + 1)..old_width {
                    ptr::write(ptr.as_ptr().add(i - 1), Rc::clone(&old.children()[i]));
                }
            }
            ptr
        };
        Ok(TableNode { bitmap: old.bitmap & !(1 << sparse), children, cache: Rc::clone(cache) })
    }

    /// A same-width copy of `old` with the child at dense index `dense`
    /// replaced by `new_child` — used on the way back up a recursive
    /// update so every table on the touched spine is rebuilt.
    pub(crate) fn with_replaced(
        cache: &SharedTableCache<K, V>,
        old: &TableNode<K, V>,
        dense: usize,
        new_child: Rc<HamtNode<K, V>>,
    ) -> Result<Self, HamtError> {
        let width = old.width();
        let ptr = Self::alloc_row(cache, width)?;
        let mut new_child = Some(new_child);
        // SAFETY: `ptr` is freshly allocated for exactly `width` records;
        // every index in 0..width is written exactly once.
        unsafe {
            for i in 0..width {
                let value = if i == dense {
                    new_child.take().expect("dense index visited exactly once")
                } else {
                    Rc::clone(&old.children()[i])
                };
                ptr::write(ptr.as_ptr().add(i), value);
            }
        }
        Ok(TableNode { bitmap: old.bitmap, children: ptr, cache: Rc::clone(cache) })
    }
}

impl<K, V> Drop for TableNode<K, V> {
    fn drop(&mut self) {
        let width = self.width();
        if width == 0 {
            return;
        }
        // SAFETY: `children` points at exactly `width` initialized
        // records; nothing reads through `self.children` after this point.
        unsafe {
            let slice_ptr = ptr::slice_from_raw_parts_mut(self.children.as_ptr(), width);
            ptr::drop_in_place(slice_ptr);
            // `width` is a bitmap population count, always in 1..=32, so
            // this can never fail the size-class check.
            self.cache
                .borrow_mut()
                .free(width, self.children)
                .expect("table width derived from a bitmap popcount is always in 1..=32");
        }
    }
}

/// The three-outcome result of descending the trie.
pub(crate) enum SearchResult<'a, K, V> {
    Found(&'a V),
    NotFound,
    KeyMismatch { existing_key: &'a K, existing_value: &'a V },
}

/// Walks from `node`, returning one of the three outcomes above. Used
/// directly by `get`; the mutators re-derive the same three cases inline
/// because they additionally need the anchor table's bitmap/children by
/// value in order to build a replacement node, not just a read-only
/// answer.
pub(crate) fn search<'a, K, V, H>(
    node: &'a Rc<HamtNode<K, V>>,
    key: &K,
    hash: &mut HashCarrier<'_, H>,
) -> SearchResult<'a, K, V>
where
    K: Eq + Hash,
    H: std::hash::BuildHasher,
{
    match &**node {
        HamtNode::Leaf(existing_key, existing_value) => {
            if existing_key == key {
                SearchResult::Found(existing_value)
            } else {
                SearchResult::KeyMismatch { existing_key, existing_value }
            }
        }
        HamtNode::Table(table) => {
            let sparse = hash.index() as u32;
            if !table.has_child(sparse) {
                return SearchResult::NotFound;
            }
            let dense = table.dense_index(sparse);
            hash.advance(key);
            search(&table.children()[dense], key, hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    fn fresh_cache<K, V>() -> SharedTableCache<K, V> {
        Rc::new(RefCell::new(TableCache::new()))
    }

    #[test]
    fn empty_table_has_zero_width_and_no_children() {
        let cache = fresh_cache::<&str, i32>();
        let table = TableNode::new_empty(&cache);
        assert_eq!(table.width(), 0);
        assert!(table.children().is_empty());
    }

    #[test]
    fn extend_then_search_finds_new_leaf() {
        let cache = fresh_cache::<&str, i32>();
        let empty = TableNode::new_empty(&cache);
        let leaf = Rc::new(HamtNode::Leaf("k", 1));
        let extended = TableNode::extended(&cache, &empty, 3, leaf).unwrap();
        assert_eq!(extended.width(), 1);
        assert!(extended.has_child(3));
        assert!(!extended.has_child(4));
    }

    #[test]
    fn search_reports_key_mismatch_on_colliding_leaf() {
        let hasher_builder = RandomState::new();
        let leaf: Rc<HamtNode<&str, i32>> = Rc::new(HamtNode::Leaf("a", 1));
        let mut hash = HashCarrier::new(&hasher_builder, &"b");
        match search(&leaf, &"b", &mut hash) {
            SearchResult::KeyMismatch { existing_key, existing_value } => {
                assert_eq!(*existing_key, "a");
                assert_eq!(*existing_value, 1);
            }
            _ => panic!("expected KeyMismatch"),
        }
    }

    #[test]
    fn search_found_on_matching_leaf() {
        let hasher_builder = RandomState::new();
        let leaf: Rc<HamtNode<&str, i32>> = Rc::new(HamtNode::Leaf("a", 1));
        let mut hash = HashCarrier::new(&hasher_builder, &"a");
        match search(&leaf, &"a", &mut hash) {
            SearchResult::Found(value) => assert_eq!(*value, 1),
            _ => panic!("expected Found"),
        }
    }
}
