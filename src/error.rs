//! Error types surfaced by the trie's fallible operations.

use std::fmt;

use crate::alloc::allocator::AllocError;

/// Errors surfaced from the trie's mutating operations.
///
/// Lookup ("not found") is never an error — `get`/`remove` return `None` for
/// that case. This type exists for two kinds of failure: backing-allocator
/// exhaustion, and programmer misuse of the table cache's size classes.
#[derive(Debug)]
pub enum HamtError {
    /// The table cache (or its backing allocator) failed to produce memory
    /// for a resized children array.
    Alloc(AllocError),
    /// A table width fell outside the valid size-class range `1..=32`.
    ///
    /// `TableCache::alloc`/`free` check this unconditionally, in both debug
    /// and release builds, and return this variant rather than indexing out
    /// of bounds. Every table width the trie itself asks the cache for is
    /// derived from a bitmap population count, which is always in range, so
    /// in practice this only fires against direct, out-of-range `TableCache`
    /// use.
    SizeClass(usize),
}

impl fmt::Display for HamtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HamtError::Alloc(err) => write!(f, "table allocation failed: {err}"),
            HamtError::SizeClass(width) => {
                write!(f, "table width {width} is outside the valid size-class range 1..=32")
            }
        }
    }
}

impl std::error::Error for HamtError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HamtError::Alloc(err) => Some(err),
            HamtError::SizeClass(_) => None,
        }
    }
}

impl From<AllocError> for HamtError {
    fn from(err: AllocError) -> Self {
        HamtError::Alloc(err)
    }
}
