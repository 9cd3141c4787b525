//! Allocator seam — stack and buffer storage
//!
//! The kernel never touches memory directly: it asks an [`Allocator`] for an
//! opaque [`Handle`] when a task or queue is created and hands it back on
//! deletion. [`FixedHeap`] is a first-fit allocator over a fixed byte budget,
//! enough to drive the kernel on a host or a target without a real heap.

use heapless::Vec;
use log::warn;

use crate::config::HEAP_SIZE;

/// Allocation granularity (bytes)
pub const HEAP_ALIGNMENT: usize = 4;
/// Smallest block the heap hands out (bytes)
pub const MIN_BLOCK_SIZE: usize = 16;
/// Maximum live allocations in a [`FixedHeap`]
pub const MAX_ALLOCATIONS: usize = 16;

/// Opaque storage handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    offset: u32,
    size: u32,
}

impl Handle {
    /// Build a handle (for allocator implementations)
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Offset inside the allocator's region
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Reserved size in bytes (after alignment)
    pub fn size(&self) -> usize {
        self.size as usize
    }
}

/// Allocate/release service consumed by the kernel
pub trait Allocator {
    /// Reserve `size` bytes, `None` when out of memory
    fn allocate(&mut self, size: usize) -> Option<Handle>;
    /// Return storage obtained from [`Allocator::allocate`]
    fn release(&mut self, handle: Handle);
}

/// Heap statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub used_bytes: usize,
    pub peak_used_bytes: usize,
    pub allocations: u32,
    pub releases: u32,
    pub failed_allocations: u32,
}

/// First-fit allocator over a fixed byte budget
pub struct FixedHeap {
    /// Total budget in bytes
    size: usize,
    /// Live blocks, sorted by offset
    blocks: Vec<Handle, MAX_ALLOCATIONS>,
    stats: HeapStats,
}

impl FixedHeap {
    /// Heap with the default [`HEAP_SIZE`] budget
    pub const fn new() -> Self {
        Self::with_size(HEAP_SIZE)
    }

    /// Heap with a custom budget
    pub const fn with_size(size: usize) -> Self {
        Self {
            size,
            blocks: Vec::new(),
            stats: HeapStats {
                used_bytes: 0,
                peak_used_bytes: 0,
                allocations: 0,
                releases: 0,
                failed_allocations: 0,
            },
        }
    }

    /// Total budget
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes currently free
    pub fn free_bytes(&self) -> usize {
        self.size - self.stats.used_bytes
    }

    /// Largest single request that would currently succeed
    pub fn largest_free_block(&self) -> usize {
        let mut largest = 0;
        let mut cursor = 0;
        for block in &self.blocks {
            largest = largest.max(block.offset() - cursor);
            cursor = block.offset() + block.size();
        }
        largest.max(self.size - cursor)
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.blocks.len()
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    fn align(size: usize) -> usize {
        let aligned = (size + HEAP_ALIGNMENT - 1) & !(HEAP_ALIGNMENT - 1);
        aligned.max(MIN_BLOCK_SIZE)
    }

    /// First gap able to hold `size` bytes: (insert index, offset)
    fn find_gap(&self, size: usize) -> Option<(usize, usize)> {
        let mut cursor = 0;
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.offset() - cursor >= size {
                return Some((idx, cursor));
            }
            cursor = block.offset() + block.size();
        }
        if self.size - cursor >= size {
            Some((self.blocks.len(), cursor))
        } else {
            None
        }
    }
}

impl Default for FixedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for FixedHeap {
    fn allocate(&mut self, size: usize) -> Option<Handle> {
        if size == 0 || size > self.size {
            self.stats.failed_allocations += 1;
            return None;
        }
        let size = Self::align(size);
        let Some((idx, offset)) = self.find_gap(size) else {
            self.stats.failed_allocations += 1;
            return None;
        };
        let handle = Handle::new(offset as u32, size as u32);
        if self.blocks.insert(idx, handle).is_err() {
            self.stats.failed_allocations += 1;
            return None;
        }
        self.stats.allocations += 1;
        self.stats.used_bytes += size;
        self.stats.peak_used_bytes = self.stats.peak_used_bytes.max(self.stats.used_bytes);
        Some(handle)
    }

    fn release(&mut self, handle: Handle) {
        match self.blocks.iter().position(|b| *b == handle) {
            Some(idx) => {
                self.blocks.remove(idx);
                self.stats.releases += 1;
                self.stats.used_bytes -= handle.size();
            }
            None => warn!("heap: release of unknown block at offset {}", handle.offset()),
        }
    }
}
