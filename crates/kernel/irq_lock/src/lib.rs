//! Spin locks that keep local interrupts masked while they are held.
//!
//! Interrupt masking nests per execution context, not per lock. The first
//! lock taken by a context disables local interrupts and remembers whether
//! they were enabled before; later locks only bump the nesting depth. The
//! saved state is restored when the depth drops back to zero, whatever order
//! the locks are released in.
//!
//! The crate is generic over [`LocalCpu`], so the kernel plugs in the real
//! `RFLAGS.IF` handling while tests run on host threads.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub use self::spin_lock::{RawSpinLock, SpinLock, SpinLockGuard};

mod spin_lock;

/// The local CPU as seen by a lock.
pub trait LocalCpu {
    /// Returns `true` if local interrupts are enabled.
    fn interrupts_enabled() -> bool;

    /// Enables local interrupts.
    fn enable_interrupts();

    /// Disables local interrupts.
    fn disable_interrupts();

    /// Returns the nesting state of the running execution context.
    ///
    /// Only called with local interrupts disabled. The returned state must
    /// stay with the context (a kernel thread, or a CPU before it has one)
    /// if the context is switched out while spinning.
    fn nesting() -> &'static IrqNesting;

    /// Hint issued on every iteration of a spin-wait loop.
    fn relax() {
        core::hint::spin_loop();
    }
}

/// Lock nesting state of one execution context.
#[derive(Debug, Default)]
pub struct IrqNesting {
    depth: AtomicUsize,
    int_enabled: AtomicBool,
}

impl IrqNesting {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            int_enabled: AtomicBool::new(false),
        }
    }

    /// Returns the number of locks held by this context.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    fn push(&self, int_enabled: bool) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed);
        if depth == 0 {
            self.int_enabled.store(int_enabled, Ordering::Relaxed);
        }
    }

    /// Returns the interrupt state to restore once the outermost lock is gone.
    fn pop(&self) -> Option<bool> {
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed);
        assert!(depth > 0, "irq nesting underflow");
        (depth == 1).then(|| self.int_enabled.load(Ordering::Relaxed))
    }
}
