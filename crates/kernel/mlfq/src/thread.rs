use core::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::Priority;

/// Unique, never reused thread identifier.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::Into,
)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Allocates a fresh identifier.
    ///
    /// Safe to call from any CPU concurrently.
    pub fn alloc() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Scheduler-visible thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    /// Created but never handed to a scheduler.
    #[default]
    Invalid,
    /// Waiting in a run queue or in `just_queued`.
    Runnable,
    /// Running on its CPU.
    OnCpu,
}

/// Diagnostic counters of one thread.
///
/// Each counter moves exactly once per scheduler event it tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStats {
    /// Ticks spent on CPU.
    pub runtime_overall: u64,
    /// Times the thread was picked to run.
    pub dispatch_count: u64,
    /// Ticks spent waiting in a queue before being dispatched.
    pub rqwait_overall: u64,
    /// Ticks spent on CPU at each priority, indexed by [`Priority::index()`].
    pub prio_map: [u64; Priority::LEVELS],
    /// Preemptions by a higher priority arrival.
    pub preempt_high_prio: u64,
    /// Preemptions at the end of a slice.
    pub preempt_slice_end: u64,
}

impl Default for ThreadStats {
    fn default() -> Self {
        Self {
            runtime_overall: 0,
            dispatch_count: 0,
            rqwait_overall: 0,
            prio_map: [0; Priority::LEVELS],
            preempt_high_prio: 0,
            preempt_slice_end: 0,
        }
    }
}

impl ThreadStats {
    /// Average queue wait per dispatch, in ticks.
    #[must_use]
    pub fn average_wait(&self) -> u64 {
        self.rqwait_overall
            .checked_div(self.dispatch_count)
            .unwrap_or(0)
    }

    /// Formats the non-zero entries of `prio_map`, highest priority first,
    /// as space separated `prio:ticks` pairs.
    pub fn prio_histogram(&self) -> PrioHistogram<'_> {
        PrioHistogram(self)
    }
}

/// See [`ThreadStats::prio_histogram()`].
#[derive(Debug, Clone, Copy)]
pub struct PrioHistogram<'a>(&'a ThreadStats);

impl fmt::Display for PrioHistogram<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for prio in Priority::iter_desc() {
            let ticks = self.0.prio_map[prio.index()];
            if ticks > 0 {
                write!(f, "{sep}{}:{ticks}", prio.get())?;
                sep = " ";
            }
        }
        Ok(())
    }
}

/// Thread descriptor.
///
/// `A` carries the architecture side of the thread: saved registers, stack,
/// lock nesting. The scheduler never looks inside it.
#[derive(Debug)]
pub struct Thread<A> {
    id: ThreadId,
    state: ThreadState,
    pub(crate) slice_ticks: u32,
    pub(crate) enqueued_at: u64,
    pub(crate) stats: ThreadStats,
    arch: A,
}

impl<A> Thread<A> {
    /// Creates a descriptor with a freshly allocated id.
    pub fn new(arch: A) -> Self {
        Self {
            id: ThreadId::alloc(),
            state: ThreadState::Invalid,
            slice_ticks: 0,
            enqueued_at: 0,
            stats: ThreadStats::default(),
            arch,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    /// Ticks consumed in the current slice.
    pub fn slice_ticks(&self) -> u32 {
        self.slice_ticks
    }

    /// Tick at which the thread entered its current queue.
    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Projects a descriptor pointer onto its architecture part.
    ///
    /// # Safety
    ///
    /// `this` must point to a live descriptor.
    pub unsafe fn arch_ptr(this: NonNull<Self>) -> NonNull<A> {
        unsafe { NonNull::new_unchecked(&raw mut (*this.as_ptr()).arch) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Thread::new(());
        let b = Thread::new(());
        assert!(a.id() < b.id());
        assert_eq!(a.state(), ThreadState::Invalid);
    }

    #[test]
    fn state_names() {
        assert_eq!(ThreadState::OnCpu.to_string(), "ON_CPU");
        assert_eq!(ThreadState::Runnable.to_string(), "RUNNABLE");
    }

    #[test]
    fn average_wait_of_undispatched_thread_is_zero() {
        let stats = ThreadStats::default();
        assert_eq!(stats.average_wait(), 0);

        let stats = ThreadStats {
            dispatch_count: 4,
            rqwait_overall: 10,
            ..ThreadStats::default()
        };
        assert_eq!(stats.average_wait(), 2);
    }

    #[test]
    fn histogram_lists_every_level_in_full() {
        let stats = ThreadStats {
            prio_map: [u64::MAX; Priority::LEVELS],
            ..ThreadStats::default()
        };
        let text = stats.prio_histogram().to_string();
        let entries = text.split(' ').collect::<Vec<_>>();
        assert_eq!(entries.len(), Priority::LEVELS);
        assert_eq!(entries[0], format!("{}:{}", Priority::MAX, u64::MAX));
        assert_eq!(
            entries[Priority::LEVELS - 1],
            format!("{}:{}", Priority::MIN, u64::MAX)
        );
    }

    #[test]
    fn histogram_skips_unused_levels() {
        let mut stats = ThreadStats::default();
        assert_eq!(stats.prio_histogram().to_string(), "");
        stats.prio_map[Priority::DEFAULT.index()] = 7;
        stats.prio_map[Priority::MIN.index()] = 1;
        assert_eq!(
            stats.prio_histogram().to_string(),
            format!("{}:7 {}:1", Priority::DEFAULT, Priority::MIN)
        );
    }

    #[test]
    fn arch_ptr_points_into_descriptor() {
        let mut t = Thread::new(42_u32);
        let ptr = unsafe { Thread::arch_ptr(NonNull::from(&mut t)) };
        assert_eq!(unsafe { *ptr.as_ptr() }, 42);
    }
}
