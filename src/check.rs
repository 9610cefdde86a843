//! The heap consistency checker.
//!
//! Development-time diagnostics: a forward walk over every block plus a
//! walk of every free list, panicking on the first violated structural
//! invariant. These invariants are load-bearing; a heap that fails them
//! cannot be repaired in place.

use crate::bins::bin_index;
use crate::block::{
    block_alloc, block_size, footer, get, header, next_block, word_alloc, word_size, DWORD,
    MIN_BLOCK, WORD,
};
use crate::llist::FreeNode;
use crate::source::HeapSource;
use crate::{Heap, BIN_COUNT};

impl<S: HeapSource> Heap<S> {
    /// Walk the heap and every free list, panicking on any violated
    /// invariant. With `verbose`, every visited block is printed.
    pub fn check_heap(&self, verbose: bool) {
        assert!(!self.bins.is_null(), "heap not initialized");

        unsafe {
            let start = self.heap_start;

            if verbose {
                println!("heap ({:p}):", start);
            }

            assert_eq!(block_size(start), DWORD, "bad prologue size");
            assert!(block_alloc(start), "prologue not allocated");

            let mut bp = start;
            while block_size(bp) > 0 {
                if verbose {
                    print_block(bp);
                }
                self.check_block(bp);
                bp = next_block(bp);
            }

            if verbose {
                print_block(bp);
            }
            assert!(block_alloc(bp), "epilogue not allocated");
            if let Some(bounds) = self.source.bounds() {
                assert_eq!(bp, bounds.end, "epilogue not at the heap top");
            }

            // every listed block is free, in the right class, and
            // reciprocally linked
            for bin in 0..BIN_COUNT {
                for node in FreeNode::iter(*self.bin_ptr(bin)) {
                    let fbp = node.cast::<u8>();
                    assert!(!block_alloc(fbp), "allocated block {:p} on a free list", fbp);
                    assert_eq!(
                        bin_index(block_size(fbp)),
                        bin,
                        "free block {:p} is filed in the wrong class",
                        fbp
                    );

                    let FreeNode { next, prev } = node.read();
                    if !next.is_null() {
                        assert_eq!((*next).prev, node, "broken next link at {:p}", fbp);
                    }
                    if prev.is_null() {
                        assert_eq!(*self.bin_ptr(bin), node, "headless free block {:p}", fbp);
                    } else {
                        assert_eq!((*prev).next, node, "broken prev link at {:p}", fbp);
                    }
                }
            }
        }
    }

    /// ### Safety:
    /// `bp` must name a block reachable from the prologue.
    unsafe fn check_block(&self, bp: *mut u8) {
        assert_eq!(bp as usize % WORD, 0, "payload {:p} not word aligned", bp);
        assert_eq!(get(header(bp)), get(footer(bp)), "header/footer mismatch at {:p}", bp);

        let size = block_size(bp);
        assert_eq!(size % WORD, 0, "ragged size {} at {:p}", size, bp);
        if bp != self.heap_start {
            assert!(size >= MIN_BLOCK, "undersized block ({}) at {:p}", size, bp);
        }

        if !block_alloc(bp) {
            assert!(block_alloc(next_block(bp)), "free neighbors above {:p} escaped coalescing", bp);
            assert!(
                word_alloc(get(bp.sub(DWORD))),
                "free neighbors below {:p} escaped coalescing",
                bp
            );
            assert!(self.on_free_list(bp), "free block {:p} is on no free list", bp);
        }
    }

    unsafe fn on_free_list(&self, bp: *mut u8) -> bool {
        let first = *self.bin_ptr(bin_index(block_size(bp)));
        FreeNode::iter(first).any(|node| node.cast::<u8>() == bp)
    }
}

unsafe fn print_block(bp: *mut u8) {
    let head = get(header(bp));
    if word_size(head) == 0 {
        println!("{:p}: end of heap", bp);
        return;
    }

    let foot = get(footer(bp));
    println!(
        "{:p}: header [{}:{}] footer [{}:{}]",
        bp,
        word_size(head),
        if word_alloc(head) { 'a' } else { 'f' },
        word_size(foot),
        if word_alloc(foot) { 'a' } else { 'f' },
    );
}
