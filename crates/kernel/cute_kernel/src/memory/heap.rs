//! Kernel heap.
//!
//! A bump allocator over a static arena. Nothing allocated in this kernel
//! is ever freed: threads and their stacks live forever.

use core::{
    alloc::{GlobalAlloc, Layout},
    cell::UnsafeCell,
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::param::HEAP_SIZE;

#[repr(C, align(4096))]
struct Arena(UnsafeCell<[u8; HEAP_SIZE]>);

unsafe impl Sync for Arena {}

struct BumpAllocator {
    arena: Arena,
    /// Offset of the first free byte in `arena`.
    next: AtomicUsize,
}

unsafe impl GlobalAlloc for BumpAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let base = self.arena.0.get().cast::<u8>();
        let mut next = self.next.load(Ordering::Relaxed);
        loop {
            let start = (base.addr() + next).next_multiple_of(layout.align()) - base.addr();
            let Some(end) = start.checked_add(layout.size()).filter(|&end| end <= HEAP_SIZE) else {
                return ptr::null_mut();
            };
            match self
                .next
                .compare_exchange_weak(next, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return unsafe { base.add(start) },
                Err(current) => next = current,
            }
        }
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
}

#[global_allocator]
static GLOBAL_ALLOCATOR: BumpAllocator = BumpAllocator {
    arena: Arena(UnsafeCell::new([0; HEAP_SIZE])),
    next: AtomicUsize::new(0),
};

/// Bytes handed out so far.
pub fn used() -> usize {
    GLOBAL_ALLOCATOR.next.load(Ordering::Relaxed)
}
