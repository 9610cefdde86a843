#![no_main]

use std::alloc::{GlobalAlloc, Layout};

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use segfit::{ArenaSource, Heap, LockedHeap};

#[derive(Arbitrary, Debug)]
enum Action {
    /// Allocate `size` bytes and fill them.
    Alloc { size: u16 },
    /// Free the ith live allocation.
    Free { index: u8 },
    /// Reallocate the ith live allocation to `new_size` bytes.
    Realloc { index: u8, new_size: u16 },
}
use Action::*;

fuzz_target!(|actions: Vec<Action>| {
    let allocator: LockedHeap<spin::Mutex<()>, ArenaSource> =
        Heap::new(ArenaSource::with_capacity(32 << 20)).lock();
    if allocator.heap().init().is_err() {
        return;
    }

    let mut live: Vec<(*mut u8, u16)> = vec![];

    for action in actions {
        match action {
            Alloc { size } => {
                if size == 0 {
                    continue;
                }

                let layout = Layout::from_size_align(size as usize, 8).unwrap();
                let p = unsafe { allocator.alloc(layout) };
                if !p.is_null() {
                    unsafe { p.write_bytes(size as u8, size as usize) };
                    live.push((p, size));
                }
            }
            Free { index } => {
                if live.is_empty() {
                    continue;
                }

                let (p, size) = live.swap_remove(index as usize % live.len());
                let layout = Layout::from_size_align(size as usize, 8).unwrap();
                unsafe {
                    check_fill(p, size, size);
                    allocator.dealloc(p, layout);
                }
            }
            Realloc { index, new_size } => {
                if live.is_empty() || new_size == 0 {
                    continue;
                }

                let slot = index as usize % live.len();
                let (p, size) = live[slot];
                let layout = Layout::from_size_align(size as usize, 8).unwrap();

                unsafe { check_fill(p, size, size.min(new_size)) };
                let q = unsafe { allocator.realloc(p, layout, new_size as usize) };
                if !q.is_null() {
                    unsafe {
                        check_fill(q, size, size.min(new_size));
                        q.write_bytes(new_size as u8, new_size as usize);
                    }
                    live[slot] = (q, new_size);
                }
            }
        }

        allocator.heap().check_heap(false);
    }

    for (p, size) in live {
        let layout = Layout::from_size_align(size as usize, 8).unwrap();
        unsafe {
            check_fill(p, size, size);
            allocator.dealloc(p, layout);
        }
    }
    allocator.heap().check_heap(false);
});

unsafe fn check_fill(p: *mut u8, fill: u16, len: u16) {
    for i in 0..len as usize {
        assert_eq!(p.add(i).read(), fill as u8);
    }
}
