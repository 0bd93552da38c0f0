use alloc::boxed::Box;
use core::{
    fmt,
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, Ordering},
};

/// A single-slot mailbox for passing an allocation to another CPU.
///
/// A secondary CPU cannot allocate before its locking is set up, so the
/// bootstrap CPU allocates on its behalf and leaves the result here before
/// sending the SIPI. The target takes it on its startup path.
pub struct Handoff<T> {
    slot: AtomicPtr<T>,
}

unsafe impl<T> Send for Handoff<T> where T: Send {}
unsafe impl<T> Sync for Handoff<T> where T: Send {}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("filled", &self.is_filled())
            .finish()
    }
}

impl<T> Handoff<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Returns `true` if a value waits to be taken.
    pub fn is_filled(&self) -> bool {
        !self.slot.load(Ordering::Acquire).is_null()
    }

    /// Leaves `value` for the other side.
    ///
    /// # Panics
    ///
    /// Panics if the previous value has not been taken yet.
    pub fn put(&self, value: Box<T>) {
        let new = Box::into_raw(value);
        if self
            .slot
            .compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            drop(unsafe { Box::from_raw(new) });
            panic!("handoff slot already filled");
        }
    }

    /// Takes the waiting value, if any.
    pub fn take(&self) -> Option<Box<T>> {
        let value = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        NonNull::new(value).map(|value| unsafe { Box::from_raw(value.as_ptr()) })
    }
}

impl<T> Drop for Handoff<T> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;

    #[test]
    fn empty_slot_gives_nothing() {
        let slot = Handoff::<u32>::new();
        assert!(!slot.is_filled());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn value_crosses_to_another_thread_once() {
        let slot = Arc::new(Handoff::new());
        slot.put(Box::new([7_u8; 64]));
        assert!(slot.is_filled());

        let other = Arc::clone(&slot);
        let taken = thread::spawn(move || other.take()).join().unwrap();
        assert_eq!(taken.as_deref(), Some(&[7_u8; 64]));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn slot_is_reusable_after_take() {
        let slot = Handoff::new();
        slot.put(Box::new(1));
        assert_eq!(slot.take().as_deref(), Some(&1));
        slot.put(Box::new(2));
        assert_eq!(slot.take().as_deref(), Some(&2));
    }

    #[test]
    #[should_panic = "handoff slot already filled"]
    fn second_put_before_take_panics() {
        let slot = Handoff::new();
        slot.put(Box::new(1));
        slot.put(Box::new(2));
    }

    #[test]
    fn pending_value_is_dropped_with_slot() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let slot = Handoff::new();
        slot.put(Box::new(Counted(Arc::clone(&drops))));
        assert_eq!(drops.load(Ordering::Relaxed), 0);
        drop(slot);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
