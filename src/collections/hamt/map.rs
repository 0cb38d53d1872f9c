//! The public trie API, ephemeral mutators `set`/`remove`, and persistent
//! mutators `pset`/`premove`.
//!
//! `set`/`remove` and `pset`/`premove` are built from the *same* recursive
//! update functions ([`insert_rec`], [`remove_from_table`]): every
//! mutation, ephemeral or persistent, always functionally rebuilds the
//! root-to-leaf spine it touches and returns a fresh root. The only
//! difference between the two modes is what the caller does with that
//! fresh root — overwrite `self.root` (ephemeral) or hand it back inside a
//! brand-new `Hamt` value that still shares the untouched subtrees and the
//! table cache with `self` (persistent).

use std::cell::RefCell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;

use crate::alloc::slab::{TableCache, TableCacheConfig};
use crate::error::HamtError;

use super::hash::HashCarrier;
use super::iter::Iter;
use super::node::{HamtNode, SearchResult, SharedTableCache, TableNode};

/// A hash array-mapped trie supporting both ephemeral (in-place) and
/// persistent (structurally shared) updates.
///
/// `K` and `V` are bounded by `Clone` because a persistent update may need
/// to read a value out of a node still referenced by another trie version
/// (the overwritten leaf on `set`, or either leaf when splitting) without
/// being able to move it out of shared storage.
pub struct Hamt<K, V, H = RandomState>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher,
{
    root: Rc<HamtNode<K, V>>,
    len: usize,
    hasher_builder: H,
    cache: SharedTableCache<K, V>,
}

impl<K, V> Hamt<K, V, RandomState>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty trie with the default hasher and table-cache
    /// configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V> Default for Hamt<K, V, RandomState>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, H> Hamt<K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher,
{
    /// Creates an empty trie using `hasher_builder` for key hashing.
    pub fn with_hasher(hasher_builder: H) -> Self {
        Self::with_config(hasher_builder, TableCacheConfig::default())
    }

    /// Creates an empty trie with an explicit table-cache seed-capacity
    /// configuration.
    pub fn with_config(hasher_builder: H, table_cache_config: TableCacheConfig) -> Self {
        let cache: SharedTableCache<K, V> = Rc::new(RefCell::new(TableCache::with_config(table_cache_config)));
        let root = Rc::new(HamtNode::Table(TableNode::new_empty(&cache)));
        Hamt { root, len: 0, hasher_builder, cache }
    }

    /// Number of (key, value) pairs reachable from the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up `key`. `None` covers both of `search`'s non-`Found`
    /// outcomes.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut hash = HashCarrier::new(&self.hasher_builder, key);
        match super::node::search(&self.root, key, &mut hash) {
            SearchResult::Found(value) => Some(value),
            SearchResult::NotFound | SearchResult::KeyMismatch { .. } => None,
        }
    }

    /// Ephemeral insert/overwrite. Returns the prior value on overwrite,
    /// `None` on fresh insert — matching Rust's own `HashMap::insert`/
    /// `BTreeMap::insert` convention.
    ///
    /// # Errors
    /// Returns [`HamtError`] if the table cache's backing allocator is
    /// exhausted while building the new spine; `self` is left unchanged in
    /// that case (the new spine is built bottom-up before `self.root` is
    /// ever touched).
    pub fn set(&mut self, key: K, value: V) -> Result<Option<V>, HamtError> {
        let mut hash = HashCarrier::new(&self.hasher_builder, &key);
        let (new_root, old_value) = insert_rec(&self.root, key, value, &mut hash, &self.cache)?;
        if old_value.is_none() {
            self.len += 1;
        }
        self.root = new_root;
        Ok(old_value)
    }

    /// Ephemeral remove. Returns the removed value, or `None` if `key`
    /// was not present.
    ///
    /// # Errors
    /// Returns [`HamtError`] if the table cache's backing allocator is
    /// exhausted while building the new spine; `self` is left unchanged in
    /// that case.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>, HamtError> {
        let mut hash = HashCarrier::new(&self.hasher_builder, key);
        let table = self.root_table();
        match remove_from_table(table, key, &mut hash, &self.cache, true)? {
            Some((new_root, value)) => {
                self.root = new_root;
                self.len -= 1;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Persistent insert/overwrite: identical semantics to [`Hamt::set`]
    /// except every table node on the touched root-to-leaf path is copied
    /// rather than mutated in place, and the result is a new trie handle
    /// sharing untouched subtrees and the table cache with `self`. `self`
    /// stays exactly as it was; old versions are kept alive for as long as
    /// the caller holds onto them, by ordinary `Rc` lifetime rules.
    ///
    /// # Errors
    /// Returns [`HamtError`] if the table cache's backing allocator is
    /// exhausted; `self` is left unchanged in that case.
    pub fn pset(&self, key: K, value: V) -> Result<Self, HamtError>
    where
        H: Clone,
    {
        let mut hash = HashCarrier::new(&self.hasher_builder, &key);
        let (new_root, old_value) = insert_rec(&self.root, key, value, &mut hash, &self.cache)?;
        let len = if old_value.is_none() { self.len + 1 } else { self.len };
        Ok(Hamt { root: new_root, len, hasher_builder: self.hasher_builder.clone(), cache: Rc::clone(&self.cache) })
    }

    /// Persistent remove: see [`Hamt::pset`] for the sharing discipline.
    /// If `key` is absent the returned handle shares the same root as
    /// `self` (a structural no-op, still a distinct handle).
    ///
    /// # Errors
    /// Returns [`HamtError`] if the table cache's backing allocator is
    /// exhausted; `self` is left unchanged in that case.
    pub fn premove(&self, key: &K) -> Result<Self, HamtError>
    where
        H: Clone,
    {
        let mut hash = HashCarrier::new(&self.hasher_builder, key);
        let table = self.root_table();
        match remove_from_table(table, key, &mut hash, &self.cache, true)? {
            Some((new_root, _value)) => Ok(Hamt {
                root: new_root,
                len: self.len - 1,
                hasher_builder: self.hasher_builder.clone(),
                cache: Rc::clone(&self.cache),
            }),
            None => Ok(Hamt {
                root: Rc::clone(&self.root),
                len: self.len,
                hasher_builder: self.hasher_builder.clone(),
                cache: Rc::clone(&self.cache),
            }),
        }
    }

    /// A depth-first iterator over `(&K, &V)` pairs.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(&self.root, self.len)
    }

    fn root_table(&self) -> &TableNode<K, V> {
        match &*self.root {
            HamtNode::Table(table) => table,
            HamtNode::Leaf(..) => unreachable!("the trie root is always a table node"),
        }
    }
}

impl<'a, K, V, H> IntoIterator for &'a Hamt<K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The shared recursive core of `set`/`pset`: rebuild the path from
/// `node` down to the leaf that `key` belongs at, returning the new
/// subtree root and the value displaced on overwrite, if any.
fn insert_rec<K, V, H>(
    node: &Rc<HamtNode<K, V>>,
    key: K,
    value: V,
    hash: &mut HashCarrier<'_, H>,
    cache: &SharedTableCache<K, V>,
) -> Result<(Rc<HamtNode<K, V>>, Option<V>), HamtError>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher,
{
    match &**node {
        HamtNode::Leaf(existing_key, existing_value) => {
            if *existing_key == key {
                let old_value = existing_value.clone();
                Ok((Rc::new(HamtNode::Leaf(key, value)), Some(old_value)))
            } else {
                let new_node = split_leaf(
                    cache,
                    hash,
                    existing_key.clone(),
                    existing_value.clone(),
                    key,
                    value,
                )?;
                Ok((new_node, None))
            }
        }
        HamtNode::Table(table) => {
            let sparse = hash.index() as u32;
            if table.has_child(sparse) {
                let dense = table.dense_index(sparse);
                let child = &table.children()[dense];
                hash.advance(&key);
                let (new_child, old_value) = insert_rec(child, key, value, hash, cache)?;
                let new_table = TableNode::with_replaced(cache, table, dense, new_child)?;
                Ok((Rc::new(HamtNode::Table(new_table)), old_value))
            } else {
                let new_leaf = Rc::new(HamtNode::Leaf(key, value));
                let new_table = TableNode::extended(cache, table, sparse, new_leaf)?;
                Ok((Rc::new(HamtNode::Table(new_table)), None))
            }
        }
    }
}

/// `split`: build a chain of single-child tables for as long as the
/// existing and new keys' hashes agree at successive 5-bit windows,
/// terminated by a 2-child table where they first diverge. Advancing both
/// hash carriers past a generation's exhaustion rehashes them in lockstep,
/// so an arbitrarily long run of agreeing levels still terminates almost
/// surely.
fn split_leaf<K, V, H>(
    cache: &SharedTableCache<K, V>,
    hash: &HashCarrier<'_, H>,
    existing_key: K,
    existing_value: V,
    new_key: K,
    new_value: V,
) -> Result<Rc<HamtNode<K, V>>, HamtError>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher,
{
    let mut existing_hash = HashCarrier::fast_forward(hash.hasher_builder(), &existing_key, hash.depth());
    let mut new_hash = *hash;

    let mut agreeing_sparse_indices = Vec::new();
    while existing_hash.index() == new_hash.index() {
        agreeing_sparse_indices.push(existing_hash.index() as u32);
        existing_hash.advance(&existing_key);
        new_hash.advance(&new_key);
    }

    let existing_leaf = Rc::new(HamtNode::Leaf(existing_key, existing_value));
    let new_leaf = Rc::new(HamtNode::Leaf(new_key, new_value));
    let (lo_index, lo_child, hi_index, hi_child) = if existing_hash.index() < new_hash.index() {
        (existing_hash.index() as u32, existing_leaf, new_hash.index() as u32, new_leaf)
    } else {
        (new_hash.index() as u32, new_leaf, existing_hash.index() as u32, existing_leaf)
    };

    let mut node = Rc::new(HamtNode::Table(TableNode::with_two(cache, lo_index, lo_child, hi_index, hi_child)?));
    for sparse in agreeing_sparse_indices.into_iter().rev() {
        node = Rc::new(HamtNode::Table(TableNode::singleton(cache, sparse, node)?));
    }
    Ok(node)
}

/// The shared recursive core of `remove`/`premove`: locate `key` under
/// `table`, shrink the table that held it, and gather (collapse to a bare
/// leaf) if that shrink leaves a single leaf child behind. Returns `None`
/// if `key` is absent; `Some` carries the rebuilt subtree and the removed
/// value.
///
/// `is_root` is `false` at every recursive call (a child table is never the
/// root) and `true` only for the initial call from [`Hamt::remove`]/
/// [`Hamt::premove`]: the root must stay a table variant even if it shrinks
/// to a single leaf child, so gather never applies to it.
fn remove_from_table<K, V, H>(
    table: &TableNode<K, V>,
    key: &K,
    hash: &mut HashCarrier<'_, H>,
    cache: &SharedTableCache<K, V>,
    is_root: bool,
) -> Result<Option<(Rc<HamtNode<K, V>>, V)>, HamtError>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher,
{
    let sparse = hash.index() as u32;
    if !table.has_child(sparse) {
        return Ok(None);
    }
    let dense = table.dense_index(sparse);
    let child = &table.children()[dense];

    match &**child {
        HamtNode::Leaf(existing_key, existing_value) => {
            if existing_key != key {
                return Ok(None);
            }
            let removed_value = existing_value.clone();
            if table.width() == 1 {
                // A non-root table can never legitimately reach width 1
                // with a bare leaf as its sole child: `extended` always
                // grows a non-root table from width >= 1 to width + 1 >= 2,
                // `split` only ever wraps further tables (never a bare
                // leaf) in its singleton chain, and the gather below (plus
                // the recursive case's gather) collapses any non-root
                // table the moment it would reach this state. So only the
                // root may shrink to zero children.
                debug_assert!(is_root, "non-root table reached width-1-with-leaf without being gathered away");
                return Ok(Some((Rc::new(HamtNode::Table(TableNode::new_empty(cache))), removed_value)));
            }
            let shrunk = TableNode::shrunk(cache, table, sparse)?;
            let result = if is_root { Rc::new(HamtNode::Table(shrunk)) } else { gather(shrunk) };
            Ok(Some((result, removed_value)))
        }
        HamtNode::Table(child_table) => {
            hash.advance(key);
            match remove_from_table(child_table, key, hash, cache, false)? {
                Some((new_child, removed_value)) => {
                    let replaced = TableNode::with_replaced(cache, table, dense, new_child)?;
                    // `new_child` may itself already be a bare leaf (a
                    // gather one level down just collapsed it). Re-checking
                    // `replaced` here lets a one-child table whose sole
                    // child just became a leaf collapse too, and the check
                    // repeats at every ancestor frame as the recursion
                    // unwinds, applied iteratively until no further
                    // gathering is possible. The root is exempt (see
                    // `is_root` doc above).
                    let result = if is_root { Rc::new(HamtNode::Table(replaced)) } else { gather(replaced) };
                    Ok(Some((result, removed_value)))
                }
                None => Ok(None),
            }
        }
    }
}

/// `gather`: collapse a table that now has exactly one child, when that
/// child is a leaf, into the leaf itself. A table whose sole remaining
/// child is itself a table is left alone.
fn gather<K, V>(table: TableNode<K, V>) -> Rc<HamtNode<K, V>> {
    if table.width() == 1 {
        if let HamtNode::Leaf(..) = &*table.children()[0] {
            return Rc::clone(&table.children()[0]);
        }
    }
    Rc::new(HamtNode::Table(table))
}
