//! # segfit
//!
//! A segregated-fit heap allocator with boundary-tag coalescing, managing
//! a single contiguous heap that only ever grows.
//!
//! [`Heap`] keeps free blocks in fifteen size-classed lists threaded
//! through the free memory itself; an allocated block carries one word of
//! overhead at each end. Freed blocks merge eagerly with their neighbors,
//! and reallocation resizes in place whenever the block or its right
//! neighbor has the room.
//!
//! The heap's memory comes from a [`HeapSource`], the classic `sbrk`
//! contract: [`ArenaSource`] serves a fixed reservation, and `SbrkSource`
//! (behind the `sbrk` feature) moves the process program break. For use as
//! a global allocator, [`LockedHeap`] wraps the whole heap in a
//! [`lock_api`] mutex.
//!
//! ```
//! use segfit::{ArenaSource, Heap};
//!
//! let mut heap = Heap::new(ArenaSource::with_capacity(1 << 20));
//! heap.init().unwrap();
//!
//! let p = heap.allocate(100).unwrap();
//! unsafe {
//!     p.as_ptr().write_bytes(0xab, 100);
//!     let p = heap.reallocate(p.as_ptr(), 200).unwrap();
//!     heap.free(p.as_ptr());
//! }
//! ```

mod bins;
mod block;
mod check;
mod llist;
mod source;

#[cfg(feature = "counters")]
mod counters;
#[cfg(feature = "lock")]
mod lock;

#[cfg(feature = "counters")]
pub use counters::Counters;
#[cfg(feature = "lock")]
pub use lock::LockedHeap;
#[cfg(all(unix, feature = "sbrk"))]
pub use source::SbrkSource;
pub use source::{ArenaSource, HeapExhausted, HeapSource};

use core::fmt;
use core::ptr::{null_mut, NonNull};

use block::{
    align_word, block_alloc, block_size, get, header, next_block, pack, prev_block, put, set_tags,
    word_alloc, DWORD, MIN_BLOCK, WORD,
};
use llist::FreeNode;

/// Number of segregated size classes.
pub const BIN_COUNT: usize = 15;

/// Size ceiling of the smallest class; class `k` holds free blocks of at
/// most `BOUND << k` bytes.
pub const BOUND: usize = 128;

/// Granule by which the heap is extended, in bytes.
pub const CHUNKSIZE: usize = 4104;

/// Alignment of every payload address.
pub const ALIGN: usize = WORD;

// Heap layout, low to high:
//   BIN_COUNT list-head words | pad word | prologue header/footer
//   | ordinary blocks ... | epilogue header (zero size, allocated)
//
// The prologue and epilogue are permanently allocated sentinels, so every
// ordinary block has a boundary tag on both sides and the coalescer never
// has to reason about the heap's edges.

/// The allocator context: one growable heap and its free-block index.
///
/// All heap state other than this struct lives inside the heap itself;
/// the list heads occupy its lowest words.
pub struct Heap<S: HeapSource> {
    /// Where the bytes come from. Exposed for bounds inspection.
    pub source: S,

    /// Payload address of the prologue; null until [`init`](Heap::init).
    heap_start: *mut u8,
    /// The segregated list heads, living at the bottom of the heap.
    bins: *mut *mut FreeNode,

    #[cfg(feature = "counters")]
    counters: counters::Counters,
}

unsafe impl<S: HeapSource + Send> Send for Heap<S> {}

impl<S: HeapSource> fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("initialized", &!self.bins.is_null())
            .field("heap_start", &self.heap_start)
            .finish()
    }
}

/// Adjusted block size for a `size`-byte request: rounded up to whole
/// words with header and footer added, never below the minimum block.
/// `None` when the arithmetic overflows.
fn adjust_request(size: usize) -> Option<usize> {
    if size <= DWORD {
        return Some(MIN_BLOCK);
    }

    let rounded = size.checked_add(WORD - 1)? & !(WORD - 1);
    let mut asize = rounded.checked_add(DWORD)?;

    // Requests at a non-trivial multiple of BOUND carry an in-block growth
    // pad, and 4092-byte requests map onto a whole extension granule. Both
    // are tuned to reallocation-heavy request cadences.
    if size % BOUND == 0 && size != BOUND {
        asize = size.checked_add(DWORD + BOUND)?;
    }
    if size == 4092 {
        asize = WORD + CHUNKSIZE;
    }

    Some(asize)
}

impl<S: HeapSource> Heap<S> {
    /// A heap over `source`. Nothing is acquired until [`init`](Heap::init).
    pub const fn new(source: S) -> Self {
        Self {
            source,
            heap_start: null_mut(),
            bins: null_mut(),
            #[cfg(feature = "counters")]
            counters: counters::Counters::new(),
        }
    }

    /// Acquire the initial heap: the bin array, the sentinel blocks, and
    /// one free block of [`CHUNKSIZE`] bytes. Idempotent.
    pub fn init(&mut self) -> Result<(), HeapExhausted> {
        if !self.bins.is_null() {
            return Ok(());
        }

        let base = self.source.grow((BIN_COUNT + 4) * WORD)?.as_ptr();
        debug_assert_eq!(base as usize % DWORD, 0);

        unsafe {
            self.bins = base.cast();
            for bin in 0..BIN_COUNT {
                self.bins.add(bin).write(null_mut());
            }

            let pad = base.add(BIN_COUNT * WORD);
            put(pad, 0); // alignment padding
            put(pad.add(WORD), pack(DWORD, true)); // prologue header
            put(pad.add(2 * WORD), pack(DWORD, true)); // prologue footer
            put(pad.add(3 * WORD), pack(0, true)); // epilogue header

            self.heap_start = pad.add(2 * WORD);

            #[cfg(feature = "counters")]
            self.counters.account_grow((BIN_COUNT + 4) * WORD);

            if let Err(e) = self.extend_heap(CHUNKSIZE / WORD) {
                self.bins = null_mut();
                self.heap_start = null_mut();
                return Err(e);
            }
        }

        Ok(())
    }

    /// Allocate at least `size` bytes, [`ALIGN`]ed. Returns `None` for a
    /// zero-sized request and when the heap cannot grow far enough.
    ///
    /// # Panics
    /// Panics if the heap is not initialized.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        assert!(!self.bins.is_null(), "heap not initialized");

        let asize = adjust_request(size)?;

        unsafe {
            if let Some(bp) = self.find_fit(asize) {
                return Some(NonNull::new_unchecked(self.place(bp, asize)));
            }

            // no fit anywhere: grow the heap and carve the block out of
            // the new top
            let extend = align_word(asize.max(CHUNKSIZE));
            let bp = self.extend_heap(extend / WORD).ok()?;
            Some(NonNull::new_unchecked(self.place(bp, asize)))
        }
    }

    /// Release the block at `ptr`. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a payload address returned by
    /// [`allocate`](Heap::allocate) or [`reallocate`](Heap::reallocate) on
    /// this heap and not freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        debug_assert!(block_alloc(ptr));
        let size = block_size(ptr);

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(size);

        set_tags(ptr, size, false);
        self.insert_block(ptr, size);
        self.coalesce(ptr);
    }

    /// Resize the block at `ptr` to hold at least `size` bytes.
    ///
    /// `reallocate(null, size)` allocates; `reallocate(ptr, 0)` frees and
    /// returns `None`. Shrinks happen in place, splitting off the tail
    /// when it can stand as a block; grows consume a free right neighbor
    /// when one suffices, and otherwise move the payload to a fresh
    /// allocation. On failure the original block is untouched and `None`
    /// is returned.
    ///
    /// # Safety
    /// `ptr` must be null or a live payload address of this heap.
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            self.free(ptr);
            return None;
        }
        if ptr.is_null() {
            return self.allocate(size);
        }

        let rounded = size.checked_add(WORD - 1)? & !(WORD - 1);
        let new_asize = rounded.checked_add(DWORD)?.max(MIN_BLOCK);
        let old_size = block_size(ptr);
        debug_assert!(block_alloc(ptr));

        if new_asize == old_size {
            return Some(NonNull::new_unchecked(ptr));
        }

        if new_asize < old_size {
            let diff = old_size - new_asize;

            // shrink in place, freeing the cut-off tail when it can stand
            // as a block of its own
            if diff >= 2 * DWORD {
                set_tags(ptr, new_asize, true);
                let rest = next_block(ptr);
                set_tags(rest, diff, false);
                self.insert_block(rest, diff);
                self.coalesce(rest);

                #[cfg(feature = "counters")]
                self.counters.account_resize(old_size, new_asize);
            }

            return Some(NonNull::new_unchecked(ptr));
        }

        let grow = new_asize - old_size;
        let next = next_block(ptr);
        if !block_alloc(next) {
            let next_size = block_size(next);

            if next_size >= grow + 2 * DWORD {
                // absorb the front of the free right neighbor, re-free the
                // rest
                self.remove_block(next);
                set_tags(ptr, new_asize, true);
                let rest = next_block(ptr);
                set_tags(rest, next_size - grow, false);
                self.insert_block(rest, next_size - grow);
                self.coalesce(rest);

                #[cfg(feature = "counters")]
                self.counters.account_resize(old_size, new_asize);

                return Some(NonNull::new_unchecked(ptr));
            }

            if next_size >= grow {
                // swallow the neighbor whole
                self.remove_block(next);
                set_tags(ptr, old_size + next_size, true);

                #[cfg(feature = "counters")]
                self.counters.account_resize(old_size, old_size + next_size);

                return Some(NonNull::new_unchecked(ptr));
            }
        }

        // no room in place: allocate, copy, release the old block; the old
        // block survives a failed allocation. The copy length is bounded by
        // the old block's tag-inclusive size, so it can run one word pair
        // past the live payload; it stays inside the heap either way.
        let new = self.allocate(size)?;
        let copy = size.min(old_size);
        new.as_ptr().copy_from_nonoverlapping(ptr, copy);
        self.free(ptr);
        Some(new)
    }

    /// Extend the heap by `words` words. The new free block's header lands
    /// on the old epilogue, a fresh epilogue caps the new top, and the
    /// block is merged with a free old top.
    ///
    /// ### Safety:
    /// The heap must be initialized.
    unsafe fn extend_heap(&mut self, words: usize) -> Result<*mut u8, HeapExhausted> {
        let size = words * WORD;
        let bp = self.source.grow(size)?.as_ptr();

        set_tags(bp, size, false);
        put(header(next_block(bp)), pack(0, true));

        self.insert_block(bp, size);

        #[cfg(feature = "counters")]
        self.counters.account_grow(size);

        Ok(self.coalesce(bp))
    }

    /// Carve `asize` bytes out of the free block at `bp`, splitting off
    /// the remainder when it can stand as a block of its own. Returns the
    /// payload of the now-allocated block.
    ///
    /// ### Safety:
    /// `bp` must be a listed free block with `block_size(bp) >= asize`.
    unsafe fn place(&mut self, bp: *mut u8, asize: usize) -> *mut u8 {
        let csize = block_size(bp);
        debug_assert!(csize >= asize);

        self.remove_block(bp);

        if csize - asize >= MIN_BLOCK {
            set_tags(bp, asize, true);
            let rest = next_block(bp);
            set_tags(rest, csize - asize, false);
            self.insert_block(rest, csize - asize);
        } else {
            set_tags(bp, csize, true);
        }

        #[cfg(feature = "counters")]
        self.counters.account_alloc(block_size(bp));

        bp
    }

    /// Merge the free block at `bp` with any free immediate neighbor,
    /// keeping the free-list index consistent throughout. Returns the
    /// merged block, which afterwards has no free neighbor.
    ///
    /// ### Safety:
    /// `bp` must be a free block already linked into its size class.
    unsafe fn coalesce(&mut self, bp: *mut u8) -> *mut u8 {
        let prev_free = !word_alloc(get(bp.sub(DWORD)));
        let next_free = !block_alloc(next_block(bp));

        match (prev_free, next_free) {
            (false, false) => bp,

            (false, true) => {
                let next = next_block(bp);
                let size = block_size(bp) + block_size(next);

                self.remove_block(bp);
                self.remove_block(next);
                set_tags(bp, size, false);
                self.insert_block(bp, size);

                bp
            }

            (true, false) => {
                let prev = prev_block(bp);
                let size = block_size(prev) + block_size(bp);

                self.remove_block(bp);
                self.remove_block(prev);
                set_tags(prev, size, false);
                self.insert_block(prev, size);

                prev
            }

            (true, true) => {
                let prev = prev_block(bp);
                let next = next_block(bp);
                let size = block_size(prev) + block_size(bp) + block_size(next);

                self.remove_block(bp);
                self.remove_block(prev);
                self.remove_block(next);
                set_tags(prev, size, false);
                self.insert_block(prev, size);

                prev
            }
        }
    }

    /// Allocation statistics so far.
    #[cfg(feature = "counters")]
    pub fn counters(&self) -> &counters::Counters {
        &self.counters
    }
}
