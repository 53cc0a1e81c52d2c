//! Allocation of dependency memory from the root module instance's heap.

use std::collections::BTreeMap;

/// Trait for the heap of the root module instance, which backs the linear memory of every
/// dependency module instance in a [`Program`](crate::Program).
pub trait RootHeap: core::fmt::Debug + Send {
    /// Allocates `size` bytes, returning the address of the allocation within the root module
    /// instance's linear memory, or `None` if the heap is exhausted.
    ///
    /// Address `0` is never returned.
    fn allocate(&mut self, size: u32) -> Option<u32>;

    /// Releases an allocation previously returned by [`RootHeap::allocate()`].
    fn release(&mut self, address: u32);
}

/// A first-fit [`RootHeap`] managing a fixed range of addresses.
#[derive(Clone, Debug)]
pub struct FreeListHeap {
    /// Maps the start of each free block to its length.
    free: BTreeMap<u32, u32>,
    /// Maps the start of each allocated block to its length.
    allocated: BTreeMap<u32, u32>,
}

impl FreeListHeap {
    /// The alignment of every allocation.
    pub const ALIGNMENT: u32 = 8;

    /// Creates a heap managing `length` bytes starting at `start`.
    pub fn new(start: u32, length: u32) -> Self {
        // Keep address 0 unused, and every block aligned.
        let aligned = start.max(1).next_multiple_of(Self::ALIGNMENT);
        let end = start.saturating_add(length);
        let mut free = BTreeMap::new();
        if end > aligned {
            free.insert(aligned, end - aligned);
        }

        Self {
            free,
            allocated: BTreeMap::new(),
        }
    }

    /// The number of bytes that are not allocated.
    pub fn available(&self) -> u32 {
        self.free.values().sum()
    }

    /// The number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocated.len()
    }
}

impl RootHeap for FreeListHeap {
    fn allocate(&mut self, size: u32) -> Option<u32> {
        let size = size.max(1).checked_next_multiple_of(Self::ALIGNMENT)?;
        let (&start, &length) = self.free.iter().find(|(_, length)| **length >= size)?;

        self.free.remove(&start);
        if length > size {
            self.free.insert(start + size, length - size);
        }

        self.allocated.insert(start, size);
        Some(start)
    }

    fn release(&mut self, address: u32) {
        let Some(mut length) = self.allocated.remove(&address) else {
            log::warn!("released unknown heap address {address:#X}");
            return;
        };

        let mut start = address;
        if let Some(next) = self.free.remove(&(start + length)) {
            length += next;
        }

        if let Some((&previous, &previous_length)) = self.free.range(..start).next_back() {
            if previous + previous_length == start {
                self.free.remove(&previous);
                start = previous;
                length += previous_length;
            }
        }

        self.free.insert(start, length);
    }
}
