//! The segregated free-block index.
//!
//! Fifteen size classes, each a null-terminated doubly linked list of free
//! blocks threaded through their payloads. Class `k` holds blocks of at
//! most `BOUND << k` bytes; the last class is the catch-all. Freed blocks
//! are pushed LIFO, and searches take the first fit in the smallest viable
//! class, ascending only when a class is exhausted.

use crate::block::{block_alloc, block_size};
use crate::llist::FreeNode;
use crate::source::HeapSource;
use crate::{Heap, BIN_COUNT, BOUND};

/// Index of the smallest class admitting `size`: the least `k` with
/// `size <= BOUND << k`, saturating at the catch-all class.
#[inline]
pub(crate) fn bin_index(size: usize) -> usize {
    if size <= BOUND {
        return 0;
    }

    let k = (usize::BITS - ((size - 1) / BOUND).leading_zeros()) as usize;
    if k < BIN_COUNT {
        k
    } else {
        BIN_COUNT - 1
    }
}

impl<S: HeapSource> Heap<S> {
    /// Pointer to the `bin`th list head.
    ///
    /// ### Safety:
    /// The heap must be initialized and `bin < BIN_COUNT`.
    #[inline]
    pub(crate) unsafe fn bin_ptr(&self, bin: usize) -> *mut *mut FreeNode {
        debug_assert!(bin < BIN_COUNT);

        self.bins.add(bin)
    }

    /// Push the free block at `bp` onto the front of its size class.
    ///
    /// ### Safety:
    /// `bp` must be a free block of this heap carrying `size` in its
    /// boundary tags, not currently on any list.
    pub(crate) unsafe fn insert_block(&mut self, bp: *mut u8, size: usize) {
        debug_assert!(!block_alloc(bp));
        debug_assert_eq!(size, block_size(bp));

        FreeNode::push(self.bin_ptr(bin_index(size)), bp.cast());

        #[cfg(feature = "counters")]
        self.counters.account_insert(size);
    }

    /// Unlink the free block at `bp` from its size class. The class is
    /// recomputed from the boundary tag, never cached.
    ///
    /// ### Safety:
    /// `bp` must be on the list its current size maps to.
    pub(crate) unsafe fn remove_block(&mut self, bp: *mut u8) {
        let size = block_size(bp);

        FreeNode::unlink(self.bin_ptr(bin_index(size)), bp.cast());

        #[cfg(feature = "counters")]
        self.counters.account_remove(size);
    }

    /// First free block able to hold `asize` bytes, searching the class of
    /// `asize` and then every larger class in ascending order.
    ///
    /// ### Safety:
    /// The heap must be initialized.
    pub(crate) unsafe fn find_fit(&self, asize: usize) -> Option<*mut u8> {
        for bin in bin_index(asize)..BIN_COUNT {
            for node in FreeNode::iter(*self.bin_ptr(bin)) {
                let bp = node.cast::<u8>();
                if block_size(bp) >= asize {
                    return Some(bp);
                }
            }
        }

        None
    }
}
