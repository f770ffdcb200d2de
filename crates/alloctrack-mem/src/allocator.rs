//! Instrumented global allocator.
//!
//! Wraps any [`GlobalAlloc`] and reports each allocation and deallocation to
//! the hook. Every block carries a small header holding the allocating
//! thread's key, so a free is charged to the thread that allocated the block
//! even when another thread releases it. Rust frees eagerly, so there is no
//! collector to register: a limit trip is confirmed against the live count
//! as-is. Aborts are delivered at `checkpoint()` calls and at scope exit;
//! nothing unwinds out of the allocator.
//!
//! ```ignore
//! use alloctrack_mem::TrackingAllocator;
//!
//! #[global_allocator]
//! static ALLOC: TrackingAllocator = TrackingAllocator::system();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::mem;
use std::ptr;

use alloctrack_core::ThreadKey;

use crate::hook::{dispatch, Event};

const HEADER: Layout = Layout::new::<u64>();

/// Layout of the block handed to the inner allocator and the offset of the
/// caller's data inside it. The owner key sits in the 8 bytes before the data.
#[inline]
fn framed(layout: Layout) -> Option<(Layout, usize)> {
    HEADER.extend(layout).ok()
}

pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl<A: GlobalAlloc> TrackingAllocator<A> {
    /// Stamp the owner into a fresh block and return the caller's pointer.
    ///
    /// # Safety
    /// `base` is null or a live block of `framed(layout)` with data at `offset`.
    #[inline]
    unsafe fn finish(base: *mut u8, offset: usize) -> *mut u8 {
        if base.is_null() {
            return base;
        }
        let owner = ThreadKey::current();
        // SAFETY: `offset >= 8` and is a multiple of 8, so the header slot is
        // in bounds and aligned for `u64`.
        unsafe {
            let data = base.add(offset);
            ptr::write(data.sub(mem::size_of::<u64>()).cast::<u64>(), owner.get());
            dispatch(owner, Event::Allocate);
            data
        }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some((outer, offset)) = framed(layout) else {
            return ptr::null_mut();
        };
        // SAFETY: `outer` has non-zero size; the caller upholds the rest.
        unsafe { Self::finish(self.inner.alloc(outer), offset) }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let Some((outer, offset)) = framed(layout) else {
            return ptr::null_mut();
        };
        // SAFETY: as for `alloc`.
        unsafe { Self::finish(self.inner.alloc_zeroed(outer), offset) }
    }

    #[inline]
    unsafe fn dealloc(&self, data: *mut u8, layout: Layout) {
        let Some((outer, offset)) = framed(layout) else {
            return;
        };
        // SAFETY: `data` came from `alloc` with `layout`, so the header and
        // the base pointer are where `framed` puts them.
        unsafe {
            let owner = ptr::read(data.sub(mem::size_of::<u64>()).cast::<u64>());
            self.inner.dealloc(data.sub(offset), outer);
            dispatch(ThreadKey::new(owner), Event::Free);
        }
    }

    // A resize moves one object; it is neither an allocation nor a free. The
    // header travels with the block, so ownership does not change.
    #[inline]
    unsafe fn realloc(&self, data: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some((outer, offset)) = framed(layout) else {
            return ptr::null_mut();
        };
        let Some(new_outer_size) = offset.checked_add(new_size) else {
            return ptr::null_mut();
        };
        // SAFETY: the caller guarantees `new_size` with `layout.align()` is a
        // valid layout; the frame keeps the same alignment and data offset.
        unsafe {
            let base = self.inner.realloc(data.sub(offset), outer, new_outer_size);
            if base.is_null() {
                return base;
            }
            base.add(offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_puts_an_aligned_header_before_the_data() {
        for align in [1usize, 2, 4, 8, 16, 64, 4096] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let (outer, offset) = framed(layout).unwrap();
            assert!(offset >= mem::size_of::<u64>());
            assert_eq!(offset % align, 0);
            assert_eq!(offset % mem::align_of::<u64>(), 0);
            assert!(outer.size() >= offset + layout.size());
            assert_eq!(outer.align(), align.max(mem::align_of::<u64>()));
        }
    }

    #[test]
    fn blocks_remember_their_owner_across_threads() {
        let alloc = TrackingAllocator::system();
        let layout = Layout::from_size_align(32, 16).unwrap();
        let me = ThreadKey::current();

        let data = unsafe { alloc.alloc(layout) } as usize;
        assert_ne!(data, 0);
        assert_eq!(data % 16, 0);

        let owner = std::thread::spawn(move || {
            let data = data as *mut u8;
            let owner = unsafe { ptr::read(data.sub(8).cast::<u64>()) };
            unsafe { alloc.dealloc(data, layout) };
            owner
        })
        .join()
        .unwrap();
        assert_eq!(owner, me.get());
    }

    #[test]
    fn realloc_keeps_contents_and_owner() {
        let alloc = TrackingAllocator::system();
        let layout = Layout::from_size_align(8, 8).unwrap();
        unsafe {
            let data = alloc.alloc(layout);
            assert!(!data.is_null());
            data.write_bytes(0xAB, 8);

            let grown = alloc.realloc(data, layout, 4096);
            assert!(!grown.is_null());
            assert_eq!(*grown.add(7), 0xAB);
            assert_eq!(
                ptr::read(grown.sub(8).cast::<u64>()),
                ThreadKey::current().get()
            );
            alloc.dealloc(grown, Layout::from_size_align(4096, 8).unwrap());
        }
    }
}
