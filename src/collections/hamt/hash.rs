//! The hash state carrier: rehash-on-exhaustion via a generation counter,
//! so the trie can exceed the natural depth limit of a single hash width.

use std::hash::{BuildHasher, Hash, Hasher};

/// Bits consumed per trie level.
const BITS_PER_LEVEL: u32 = 5;

/// Width of the carried hash, in bits: the width `std::hash::Hasher::finish`
/// naturally produces.
const HASH_BITS: u32 = u64::BITS;

/// One operation's view of a key's hash: the current 64-bit hash, how deep
/// into the trie the walk has gone, the current bit shift within this
/// hash's generation, and the generation counter itself.
#[derive(Clone, Copy)]
pub(crate) struct HashCarrier<'h, H> {
    hasher_builder: &'h H,
    hash: u64,
    depth: u32,
    shift: u32,
    generation: u32,
}

impl<'h, H: BuildHasher> HashCarrier<'h, H> {
    /// Starts a fresh carrier for `key` at generation 0, depth 0.
    pub(crate) fn new<K: Hash + ?Sized>(hasher_builder: &'h H, key: &K) -> Self {
        let hash = Self::hash_with_generation(hasher_builder, key, 0);
        HashCarrier { hasher_builder, hash, depth: 0, shift: 0, generation: 0 }
    }

    fn hash_with_generation<K: Hash + ?Sized>(hasher_builder: &H, key: &K, generation: u32) -> u64 {
        let mut hasher = hasher_builder.build_hasher();
        // Folding the generation into the hashed bytes is what makes
        // successive generations statistically independent.
        generation.hash(&mut hasher);
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// The 5-bit sparse index at the carrier's current depth.
    pub(crate) fn index(&self) -> usize {
        ((self.hash >> self.shift) & 0x1F) as usize
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn hasher_builder(&self) -> &'h H {
        self.hasher_builder
    }

    /// Advances to the next trie level. Rehashes when the current
    /// generation's hash is exhausted.
    pub(crate) fn advance<K: Hash + ?Sized>(&mut self, key: &K) {
        self.depth += 1;
        self.shift += BITS_PER_LEVEL;
        if self.shift >= HASH_BITS {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation = self.generation + 1, depth = self.depth, "hash carrier rehashing");
            self.generation += 1;
            self.hash = Self::hash_with_generation(self.hasher_builder, key, self.generation);
            self.shift = 0;
        }
    }

    /// Builds a carrier for `key` already advanced to `depth` steps past
    /// generation 0 — used to align an existing leaf's key with the
    /// in-flight carrier of a newly inserted key when splitting a leaf.
    pub(crate) fn fast_forward<K: Hash + ?Sized>(hasher_builder: &'h H, key: &K, depth: u32) -> Self {
        let mut carrier = Self::new(hasher_builder, key);
        for _ in 0..depth {
            carrier.advance(key);
        }
        carrier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;

    #[test]
    fn index_is_five_bits() {
        let hasher_builder = RandomState::new();
        let carrier = HashCarrier::new(&hasher_builder, &"some key");
        assert!(carrier.index() < 32);
    }

    #[test]
    fn advance_increments_depth_and_shift() {
        let hasher_builder = RandomState::new();
        let mut carrier = HashCarrier::new(&hasher_builder, &"k");
        assert_eq!(carrier.depth(), 0);
        carrier.advance(&"k");
        assert_eq!(carrier.depth(), 1);
        carrier.advance(&"k");
        assert_eq!(carrier.depth(), 2);
    }

    #[test]
    fn rehash_past_hash_width_changes_generation() {
        let hasher_builder = RandomState::new();
        let mut carrier = HashCarrier::new(&hasher_builder, &"k");
        // 64 / 5 = 12 levels before exhaustion; the 13th advance rehashes.
        for _ in 0..12 {
            carrier.advance(&"k");
        }
        assert_eq!(carrier.generation, 0);
        carrier.advance(&"k");
        assert_eq!(carrier.generation, 1);
        assert_eq!(carrier.shift, 0);
    }

    #[test]
    fn fast_forward_matches_manual_advance() {
        let hasher_builder = RandomState::new();
        let mut manual = HashCarrier::new(&hasher_builder, &"k");
        for _ in 0..4 {
            manual.advance(&"k");
        }
        let forwarded = HashCarrier::fast_forward(&hasher_builder, &"k", 4);
        assert_eq!(manual.hash, forwarded.hash);
        assert_eq!(manual.shift, forwarded.shift);
        assert_eq!(manual.depth, forwarded.depth);
    }
}
