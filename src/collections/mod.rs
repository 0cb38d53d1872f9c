//! Collection types built on top of the crate's pluggable allocator.

pub mod hamt;
