use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::LocalCpu;

/// A test-and-set lock word coupled with local interrupt masking.
pub struct RawSpinLock<P> {
    locked: AtomicBool,
    _cpu: PhantomData<fn() -> P>,
}

impl<P> Default for RawSpinLock<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for RawSpinLock<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinLock")
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

impl<P> RawSpinLock<P> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            _cpu: PhantomData,
        }
    }

    /// Returns `true` if some context holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<P> RawSpinLock<P>
where
    P: LocalCpu,
{
    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired. While waiting for the
    /// outermost lock of a context, local interrupts are put back the way
    /// they were, so the tick on this CPU keeps running.
    pub fn lock(&self) {
        let int_enabled = P::interrupts_enabled();
        P::disable_interrupts();

        let nesting = P::nesting();
        let outermost = nesting.depth() == 0;
        debug_assert!(outermost || !int_enabled);

        // `Ordering::Acquire` keeps the critical section's loads and stores
        // after the point the lock is taken.
        while self.locked.swap(true, Ordering::Acquire) {
            if outermost && int_enabled {
                P::enable_interrupts();
            }
            while self.locked.load(Ordering::Relaxed) {
                P::relax();
            }
            P::disable_interrupts();
        }

        nesting.push(int_enabled);
    }

    /// Tries to acquire the lock once.
    ///
    /// On failure the caller's interrupt state and nesting depth are left
    /// untouched.
    pub fn try_lock(&self) -> bool {
        let int_enabled = P::interrupts_enabled();
        P::disable_interrupts();

        if self.locked.swap(true, Ordering::Acquire) {
            if int_enabled {
                P::enable_interrupts();
            }
            return false;
        }

        P::nesting().push(int_enabled);
        true
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The lock must be held by the calling execution context.
    pub unsafe fn unlock(&self) {
        debug_assert!(!P::interrupts_enabled());
        assert!(self.is_locked(), "unlocking a free spin lock");

        // `Ordering::Release` publishes every store of the critical section
        // before the lock word is seen free.
        self.locked.store(false, Ordering::Release);

        if P::nesting().pop() == Some(true) {
            P::enable_interrupts();
        }
    }
}

/// A spin lock protecting a value.
pub struct SpinLock<T, P> {
    lock: RawSpinLock<P>,
    value: UnsafeCell<T>,
}

unsafe impl<T, P> Sync for SpinLock<T, P> where T: Send {}

impl<T, P> Default for SpinLock<T, P>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, P> fmt::Debug for SpinLock<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl<T, P> SpinLock<T, P> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Returns a mutable reference to the value without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T, P> SpinLock<T, P>
where
    P: LocalCpu,
{
    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<'_, T, P> {
        self.lock.lock();
        SpinLockGuard { lock: self }
    }

    /// Acquires the lock if it is free.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T, P>> {
        self.lock
            .try_lock()
            .then(|| SpinLockGuard { lock: self })
    }
}

pub struct SpinLockGuard<'a, T, P>
where
    P: LocalCpu,
{
    lock: &'a SpinLock<T, P>,
}

unsafe impl<T, P> Sync for SpinLockGuard<'_, T, P>
where
    T: Sync,
    P: LocalCpu,
{
}

impl<T, P> Drop for SpinLockGuard<'_, T, P>
where
    P: LocalCpu,
{
    fn drop(&mut self) {
        unsafe { self.lock.lock.unlock() }
    }
}

impl<T, P> Deref for SpinLockGuard<'_, T, P>
where
    P: LocalCpu,
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T, P> DerefMut for SpinLockGuard<'_, T, P>
where
    P: LocalCpu,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use super::*;
    use crate::mock::{self, MockCpu};

    type Lock<T> = SpinLock<T, MockCpu>;
    type Raw = RawSpinLock<MockCpu>;

    #[test]
    fn lock_disables_and_unlock_restores_interrupts() {
        let lock = Lock::new(0);
        mock::set_enabled(true);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(!mock::enabled());
            assert_eq!(mock::depth(), 1);
        }
        assert!(mock::enabled());
        assert_eq!(mock::depth(), 0);
        assert!(!lock.is_locked());
    }

    #[test]
    fn lock_leaves_disabled_interrupts_disabled() {
        let lock = Lock::new(());
        mock::set_enabled(false);
        drop(lock.lock());
        assert!(!mock::enabled());
        mock::set_enabled(true);
    }

    #[test]
    fn nested_locks_restore_after_outermost_unlock() {
        let a = Lock::new(());
        let b = Lock::new(());
        mock::set_enabled(true);

        let ga = a.lock();
        let gb = b.lock();
        assert_eq!(mock::depth(), 2);

        drop(gb);
        assert!(!mock::enabled());
        assert_eq!(mock::depth(), 1);

        drop(ga);
        assert!(mock::enabled());
    }

    #[test]
    fn overlapping_release_order_keeps_interrupts_disabled() {
        let a = Raw::new();
        let b = Raw::new();
        mock::set_enabled(true);

        a.lock();
        b.lock();
        unsafe { a.unlock() };
        assert!(!mock::enabled());
        assert!(b.is_locked());
        unsafe { b.unlock() };
        assert!(mock::enabled());
        assert_eq!(mock::depth(), 0);
    }

    #[test]
    fn try_lock_on_held_lock_changes_nothing() {
        let lock = Arc::new(Lock::new(()));
        mock::set_enabled(true);
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        assert!(!mock::enabled());
        assert_eq!(mock::depth(), 1);

        let other = Arc::clone(&lock);
        let (enabled, depth) = thread::spawn(move || {
            mock::set_enabled(true);
            assert!(other.try_lock().is_none());
            (mock::enabled(), mock::depth())
        })
        .join()
        .unwrap();
        assert!(enabled);
        assert_eq!(depth, 0);

        drop(guard);
        assert!(mock::enabled());
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(!mock::enabled());
    }

    #[test]
    fn first_try_lock_winner_keeps_lock_forever() {
        let lock = Arc::new(Lock::new(()));
        mock::set_enabled(true);
        let Some(guard) = lock.try_lock() else {
            panic!("free lock not taken");
        };
        core::mem::forget(guard);
        assert!(lock.is_locked());
        assert!(!mock::enabled());

        let losers = (0..3)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    mock::set_enabled(false);
                    (lock.try_lock().is_none(), mock::depth())
                })
            })
            .collect::<Vec<_>>();
        for h in losers {
            assert_eq!(h.join().unwrap(), (true, 0));
        }
        assert!(lock.is_locked());
    }

    #[test]
    fn waiter_spins_with_interrupts_enabled() {
        let lock = Arc::new(Lock::new(0_u32));
        let started = Arc::new(AtomicBool::new(false));
        let guard = lock.lock();

        let waiter = {
            let lock = Arc::clone(&lock);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                mock::set_enabled(true);
                started.store(true, Ordering::Release);
                let mut guard = lock.lock();
                *guard += 1;
                let held_enabled = mock::enabled();
                drop(guard);
                (mock::spun_with(), held_enabled, mock::enabled())
            })
        };

        while !started.load(Ordering::Acquire) || !mock::has_spun(waiter.thread().id()) {
            thread::yield_now();
        }
        drop(guard);

        let (spun_with, held_enabled, after) = waiter.join().unwrap();
        assert_eq!(spun_with, Some(true));
        assert!(!held_enabled);
        assert!(after);
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn nested_waiter_spins_with_interrupts_disabled() {
        let outer = Arc::new(Lock::new(()));
        let inner = Arc::new(Lock::new(()));
        let guard = inner.lock();

        let waiter = {
            let outer = Arc::clone(&outer);
            let inner = Arc::clone(&inner);
            thread::spawn(move || {
                mock::set_enabled(true);
                let g_outer = outer.lock();
                drop(inner.lock());
                let spun_with = mock::spun_with();
                drop(g_outer);
                (spun_with, mock::enabled())
            })
        };

        while !mock::has_spun(waiter.thread().id()) {
            thread::yield_now();
        }
        drop(guard);

        let (spun_with, after) = waiter.join().unwrap();
        assert_eq!(spun_with, Some(false));
        assert!(after);
    }

    #[test]
    fn contended_increments_are_not_lost() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 2000;

        let counter = Arc::new(Lock::new(0_usize));
        let handles = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        *counter.lock() += 1;
                    }
                    mock::enabled()
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(*counter.lock(), THREADS * ROUNDS);
    }
}
