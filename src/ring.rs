//! Fixed-storage ring buffer for queue items
//!
//! Storage is `N` slots; the usable capacity is chosen at construction and
//! may be smaller. Head, tail and count are tracked explicitly so the full
//! capacity is usable (no reserved slot). Mutation only happens through
//! `&mut self`, which is the kernel's critical section.

/// Ring buffer of `u32` items
#[derive(Debug, Clone)]
pub struct Ring<const N: usize> {
    /// Slot storage
    buffer: [u32; N],
    /// Usable slots (1..=N)
    capacity: usize,
    /// Next slot to read
    head: usize,
    /// Next slot to write
    tail: usize,
    /// Items stored
    count: usize,
}

impl<const N: usize> Ring<N> {
    /// Create an empty ring with `capacity` usable slots (clamped to 1..=N)
    pub const fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            1
        } else if capacity > N {
            N
        } else {
            capacity
        };
        Self {
            buffer: [0u32; N],
            capacity,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Append at the tail
    ///
    /// Returns false if the ring is full.
    pub fn push(&mut self, value: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.buffer[self.tail] = value;
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
        true
    }

    /// Put an item back in front of the head
    ///
    /// Returns false if the ring is full.
    pub fn push_front(&mut self, value: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.head = (self.head + self.capacity - 1) % self.capacity;
        self.buffer[self.head] = value;
        self.count += 1;
        true
    }

    /// Remove the head item
    pub fn pop(&mut self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let value = self.buffer[self.head];
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        Some(value)
    }

    /// Read the head item without removing it
    pub fn peek(&self) -> Option<u32> {
        if self.is_empty() {
            None
        } else {
            Some(self.buffer[self.head])
        }
    }

    /// Number of items in the ring
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Usable slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots
    pub fn space(&self) -> usize {
        self.capacity - self.count
    }

    /// Do head, tail and count agree with each other?
    pub fn is_consistent(&self) -> bool {
        self.count <= self.capacity
            && self.head < self.capacity
            && self.tail < self.capacity
            && (self.head + self.count) % self.capacity == self.tail
    }
}
