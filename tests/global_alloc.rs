//! The locked wrapper through its `GlobalAlloc` face, including shared
//! use across threads.

use core::alloc::{GlobalAlloc, Layout};

use segfit::{ArenaSource, Heap, LockedHeap};

type TestHeap = LockedHeap<spin::Mutex<()>, ArenaSource>;

fn locked(capacity: usize) -> TestHeap {
    Heap::new(ArenaSource::with_capacity(capacity)).lock()
}

#[test]
fn alloc_realloc_dealloc_churn() {
    let heap = locked(8 << 20);
    let mut live: Vec<(*mut u8, Layout)> = Vec::new();

    for round in 0..50usize {
        for size in [1, 8, 24, 100, 256, 1000, 4096] {
            let layout = Layout::from_size_align(size, 8).unwrap();
            let p = unsafe { heap.alloc(layout) };
            assert!(!p.is_null());
            unsafe { p.write_bytes(round as u8, size) };
            live.push((p, layout));
        }

        // resize one survivor each round
        let (p, layout) = live[round];
        let grown = unsafe { heap.realloc(p, layout, layout.size() + 64) };
        assert!(!grown.is_null());
        live[round] = (grown, Layout::from_size_align(layout.size() + 64, 8).unwrap());

        if round % 2 == 0 {
            let (p, layout) = live.swap_remove(round / 2);
            unsafe { heap.dealloc(p, layout) };
        }
    }

    for (p, layout) in live {
        unsafe { heap.dealloc(p, layout) };
    }
    heap.heap().check_heap(false);
}

#[test]
fn threads_share_one_heap() {
    let heap = locked(16 << 20);

    std::thread::scope(|scope| {
        for t in 0..4u8 {
            let heap = &heap;
            scope.spawn(move || {
                let mut live: Vec<(*mut u8, Layout)> = Vec::new();

                for i in 0..300usize {
                    let size = (i * 17) % 240 + 1;
                    let layout = Layout::from_size_align(size, 8).unwrap();

                    let p = unsafe { heap.alloc(layout) };
                    assert!(!p.is_null());
                    unsafe { p.write_bytes(t, size) };
                    live.push((p, layout));

                    if i % 3 == 0 {
                        let (p, layout) = live.swap_remove(live.len() / 2);
                        for off in 0..layout.size() {
                            assert_eq!(unsafe { p.add(off).read() }, t);
                        }
                        unsafe { heap.dealloc(p, layout) };
                    }
                }

                for (p, layout) in live {
                    for off in 0..layout.size() {
                        assert_eq!(unsafe { p.add(off).read() }, t);
                    }
                    unsafe { heap.dealloc(p, layout) };
                }
            });
        }
    });

    heap.heap().check_heap(false);
}
