//! # `hamt` — a hash array-mapped trie
//!
//! An in-memory associative container implementing a Hash Array-Mapped Trie
//! (HAMT) over arbitrary caller keys and values. Supports both *ephemeral*
//! (destructive, in-place) updates and *persistent* (structurally shared,
//! copy-the-spine) updates against the same underlying representation, plus
//! depth-first iteration.
//!
//! ## Architecture
//!
//! - [`collections::hamt::Hamt`] is the public associative container.
//! - [`alloc::slab::TableCache`] is the size-class slab allocator that backs
//!   every table node's children array (32 size classes, one per possible
//!   table width).
//! - [`alloc::allocator::TableAllocator`] is the pluggable backing-memory
//!   interface the slab cache is layered on top of.
//!
//! ## Example
//!
//! ```rust
//! use hamt::Hamt;
//!
//! let mut trie: Hamt<&str, i32> = Hamt::new();
//! trie.set("answer", 42).unwrap();
//! assert_eq!(trie.get(&"answer"), Some(&42));
//!
//! let snapshot = trie.pset("other", 7).unwrap();
//! assert_eq!(trie.get(&"other"), None);
//! assert_eq!(snapshot.get(&"other"), Some(&7));
//! ```

#![warn(missing_docs, clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod alloc;
pub mod collections;
pub mod error;

pub use collections::hamt::{Hamt, Iter};
pub use error::HamtError;

#[cfg(all(
    feature = "alloc-mimalloc",
    not(feature = "alloc-snmalloc"),
    not(feature = "alloc-jemalloc")
))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(
    feature = "alloc-snmalloc",
    not(feature = "alloc-mimalloc"),
    not(feature = "alloc-jemalloc")
))]
#[global_allocator]
static GLOBAL: snmalloc_rs::SnMalloc = snmalloc_rs::SnMalloc;

#[cfg(all(
    feature = "alloc-jemalloc",
    not(feature = "alloc-mimalloc"),
    not(feature = "alloc-snmalloc")
))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;
