//! Allocators used while a [`SectionContext`](crate::section::SectionContext) is grown.

mod scratchpad;

pub use scratchpad::{AllocationPreference, ScratchpadAllocator};
