//! A first-fit allocator over a small fixed-capacity address space, representing the
//! per-SRAM-bank region of scratchpad a section's buffers are placed into.
//!
//! Two ordered sequences of `(begin, end, debug_tag)` chunks track free and used
//! regions. Working sets are small (tens of live allocations at once), so the linear
//! scans used here dominate over any tree-based alternative in practice, and fragmentation
//! is instead managed by the deliberate [`AllocationPreference::Start`] /
//! [`AllocationPreference::End`] interleave the section builder drives from part-id
//! parity (§4.3).

use crate::util::align::{align_down, align_up};

/// Which end of a free chunk to allocate from. The section builder alternates this
/// based on part-id parity as its only fragmentation heuristic.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum AllocationPreference {
    Start,
    End,
}

#[derive(Debug, Clone)]
struct Chunk {
    begin: u64,
    end: u64,
    debug_tag: String,
}

impl Chunk {
    fn len(&self) -> u64 {
        self.end - self.begin
    }
}

/// First-fit allocator over `[0, capacity)`.
#[derive(Debug, Clone)]
pub struct ScratchpadAllocator {
    capacity: u64,
    free: Vec<Chunk>,
    used: Vec<Chunk>,
}

impl ScratchpadAllocator {
    pub fn new(capacity: u64) -> Self {
        let mut allocator = Self {
            capacity,
            free: Vec::new(),
            used: Vec::new(),
        };
        allocator.reset();
        allocator
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.iter().map(Chunk::len).sum()
    }

    /// Attempt to allocate `size` bytes (rounded up to `alignment`), from the start or
    /// end of the first free chunk it fits in. Returns the offset of the new
    /// allocation, or `None` if no chunk is large enough.
    pub fn allocate(
        &mut self,
        size: u64,
        preference: AllocationPreference,
        alignment: u64,
        debug_tag: impl Into<String>,
    ) -> Option<u64> {
        let size = align_up(size.max(1), alignment);
        let debug_tag = debug_tag.into();
        match preference {
            AllocationPreference::Start => self.allocate_from_start(size, alignment, debug_tag),
            AllocationPreference::End => self.allocate_from_end(size, alignment, debug_tag),
        }
    }

    fn allocate_from_start(&mut self, size: u64, alignment: u64, debug_tag: String) -> Option<u64> {
        for i in 0..self.free.len() {
            let chunk = &self.free[i];
            let offset = align_up(chunk.begin, alignment);
            if offset + size > chunk.end {
                continue;
            }
            let (begin, end) = (chunk.begin, chunk.end);
            let mut replacement = Vec::new();
            if offset > begin {
                replacement.push(Chunk {
                    begin,
                    end: offset,
                    debug_tag: "(alignment gap)".to_string(),
                });
            }
            if offset + size < end {
                replacement.push(Chunk {
                    begin: offset + size,
                    end,
                    debug_tag: "".to_string(),
                });
            }
            self.free.splice(i..=i, replacement);
            self.used.push(Chunk {
                begin: offset,
                end: offset + size,
                debug_tag,
            });
            return Some(offset);
        }
        None
    }

    fn allocate_from_end(&mut self, size: u64, alignment: u64, debug_tag: String) -> Option<u64> {
        for i in (0..self.free.len()).rev() {
            let chunk = &self.free[i];
            if chunk.len() < size {
                continue;
            }
            let offset = align_down(chunk.end - size, alignment);
            if offset < chunk.begin {
                continue;
            }
            let (begin, end) = (chunk.begin, chunk.end);
            let mut replacement = Vec::new();
            if begin < offset {
                replacement.push(Chunk {
                    begin,
                    end: offset,
                    debug_tag: "".to_string(),
                });
            }
            if offset + size < end {
                replacement.push(Chunk {
                    begin: offset + size,
                    end,
                    debug_tag: "(alignment gap)".to_string(),
                });
            }
            self.free.splice(i..=i, replacement);
            self.used.push(Chunk {
                begin: offset,
                end: offset + size,
                debug_tag,
            });
            return Some(offset);
        }
        None
    }

    /// Free the allocation starting at `offset`, coalescing adjacent free chunks.
    /// # Panics
    /// Panics if there is no used allocation starting at `offset`.
    pub fn free(&mut self, offset: u64) {
        let index = self
            .used
            .iter()
            .position(|c| c.begin == offset)
            .unwrap_or_else(|| panic!("no allocation at offset {offset}"));
        let chunk = self.used.remove(index);

        let insert_at = self.free.partition_point(|c| c.begin < chunk.begin);
        self.free.insert(insert_at, chunk);
        self.coalesce();
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<Chunk> = Vec::with_capacity(self.free.len());
        for chunk in self.free.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.end == chunk.begin => {
                    prev.end = chunk.end;
                }
                _ => merged.push(chunk),
            }
        }
        self.free = merged;
    }

    /// Restore the allocator to a single free chunk covering the whole capacity.
    pub fn reset(&mut self) {
        self.used.clear();
        self.free.clear();
        self.free.push(Chunk {
            begin: 0,
            end: self.capacity,
            debug_tag: "".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_from_start_first_fit() {
        let mut alloc = ScratchpadAllocator::new(1024);
        let a = alloc.allocate(100, AllocationPreference::Start, 16, "a").unwrap();
        let b = alloc.allocate(100, AllocationPreference::Start, 16, "b").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 112); // 100 rounded up to 16 = 112
    }

    #[test]
    fn allocates_from_end() {
        let mut alloc = ScratchpadAllocator::new(1024);
        let a = alloc.allocate(100, AllocationPreference::End, 16, "a").unwrap();
        assert_eq!(a, 1024 - 112);
    }

    #[test]
    fn start_and_end_interleave_without_overlap() {
        let mut alloc = ScratchpadAllocator::new(256);
        let a = alloc.allocate(64, AllocationPreference::Start, 16, "a").unwrap();
        let b = alloc.allocate(64, AllocationPreference::End, 16, "b").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 192);
    }

    #[test]
    fn allocation_failure_when_full() {
        let mut alloc = ScratchpadAllocator::new(128);
        assert!(alloc.allocate(128, AllocationPreference::Start, 16, "a").is_some());
        assert!(alloc.allocate(16, AllocationPreference::Start, 16, "b").is_none());
    }

    #[test]
    #[should_panic]
    fn freeing_unknown_offset_panics() {
        let mut alloc = ScratchpadAllocator::new(128);
        alloc.free(64);
    }

    #[test]
    fn free_then_allocate_restores_identical_offsets() {
        // (P3)
        let mut alloc = ScratchpadAllocator::new(1024);
        let a = alloc.allocate(100, AllocationPreference::Start, 16, "a").unwrap();
        let b = alloc.allocate(200, AllocationPreference::End, 16, "b").unwrap();
        alloc.free(a);
        alloc.free(b);
        let a2 = alloc.allocate(100, AllocationPreference::Start, 16, "a").unwrap();
        let b2 = alloc.allocate(200, AllocationPreference::End, 16, "b").unwrap();
        assert_eq!(a, a2);
        assert_eq!(b, b2);
    }

    #[test]
    fn coalesces_adjacent_free_chunks() {
        let mut alloc = ScratchpadAllocator::new(256);
        let a = alloc.allocate(64, AllocationPreference::Start, 16, "a").unwrap();
        let b = alloc.allocate(64, AllocationPreference::Start, 16, "b").unwrap();
        alloc.free(a);
        alloc.free(b);
        // After freeing both, the allocator should behave as if reset: a single
        // 256-byte allocation must now fit.
        assert!(alloc.allocate(256, AllocationPreference::Start, 16, "whole").is_some());
    }

    #[test]
    fn reset_restores_full_capacity() {
        let mut alloc = ScratchpadAllocator::new(128);
        alloc.allocate(128, AllocationPreference::Start, 16, "a").unwrap();
        alloc.reset();
        assert!(alloc.is_empty());
        assert!(alloc.allocate(128, AllocationPreference::Start, 16, "a").is_some());
    }
}
