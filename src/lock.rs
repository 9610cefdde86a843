//! A mutex-wrapped heap for shared and global-allocator use.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::source::HeapSource;
use crate::{Heap, ALIGN};

/// A [`Heap`] behind a [`lock_api`] mutex, implementing [`GlobalAlloc`].
///
/// The lock is held for the whole of every operation; the data structures
/// admit no finer discipline. The heap initializes itself lazily on the
/// first allocation.
pub struct LockedHeap<R: lock_api::RawMutex, S: HeapSource>(pub lock_api::Mutex<R, Heap<S>>);

impl<R: lock_api::RawMutex, S: HeapSource> LockedHeap<R, S> {
    pub const fn new(heap: Heap<S>) -> Self {
        Self(lock_api::Mutex::new(heap))
    }

    /// Lock the mutex and access the inner [`Heap`].
    pub fn heap(&self) -> lock_api::MutexGuard<'_, R, Heap<S>> {
        self.0.lock()
    }
}

impl<S: HeapSource> Heap<S> {
    /// Wrap in a [`LockedHeap`].
    ///
    /// # Examples
    /// ```
    /// use segfit::{ArenaSource, Heap, LockedHeap};
    ///
    /// let heap: LockedHeap<spin::Mutex<()>, _> =
    ///     Heap::new(ArenaSource::with_capacity(1 << 20)).lock();
    /// ```
    pub const fn lock<R: lock_api::RawMutex>(self) -> LockedHeap<R, S> {
        LockedHeap::new(self)
    }
}

unsafe impl<R: lock_api::RawMutex, S: HeapSource> GlobalAlloc for LockedHeap<R, S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }

        let mut heap = self.0.lock();
        if heap.init().is_err() {
            return ptr::null_mut();
        }

        heap.allocate(layout.size()).map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.lock().free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        self.0.lock().reallocate(ptr, new_size).map_or(ptr::null_mut(), |p| p.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArenaSource;

    fn locked(capacity: usize) -> LockedHeap<spin::Mutex<()>, ArenaSource> {
        Heap::new(ArenaSource::with_capacity(capacity)).lock()
    }

    #[test]
    fn lazy_init_round_trip() {
        let heap = locked(1 << 20);

        unsafe {
            let layout = Layout::from_size_align(100, 8).unwrap();
            let p = heap.alloc(layout);
            assert!(!p.is_null());
            p.write_bytes(0xab, 100);

            let p = heap.realloc(p, layout, 300);
            assert!(!p.is_null());
            assert_eq!(p.read(), 0xab);
            assert_eq!(p.add(99).read(), 0xab);

            heap.dealloc(p, Layout::from_size_align(300, 8).unwrap());
        }

        heap.heap().check_heap(false);
    }

    #[test]
    fn oversized_alignment_is_refused() {
        let heap = locked(1 << 20);

        let layout = Layout::from_size_align(64, 4 * ALIGN).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
    }
}
