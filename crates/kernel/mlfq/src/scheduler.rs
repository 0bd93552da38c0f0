use alloc::{boxed::Box, collections::VecDeque, vec::Vec};
use core::{iter, mem, ptr::NonNull};

use cute_kernel_params::RR_INTERVAL;

use crate::{EnqueueMode, Priority, RunQueue, Thread, ThreadId, ThreadState};

/// Tunables of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Slice length, in ticks.
    pub rr_interval: u32,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            rr_interval: RR_INTERVAL,
        }
    }
}

/// Where a dispatched thread was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchSource {
    JustQueued,
    Active,
}

/// Where a thread currently sits in its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    OnCpu(Priority),
    Active(Priority),
    Expired(Priority),
    JustQueued,
}

/// Number of threads waiting in each queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLengths {
    pub active: usize,
    pub expired: usize,
    pub just_queued: usize,
}

pub(crate) struct Dispatch<A> {
    pub(crate) thread: Box<Thread<A>>,
    pub(crate) prio: Priority,
    pub(crate) source: DispatchSource,
}

/// A decided context switch.
///
/// Both pointers refer to descriptors owned by the scheduler. They stay valid
/// until the scheduler is used again.
#[derive(Debug)]
pub struct Switch<A> {
    prev: NonNull<Thread<A>>,
    next: NonNull<Thread<A>>,
    prev_id: ThreadId,
    next_id: ThreadId,
    prio: Priority,
    source: DispatchSource,
}

impl<A> Switch<A> {
    /// The preempted thread, now waiting in `expired`.
    pub fn prev(&self) -> NonNull<Thread<A>> {
        self.prev
    }

    /// The thread that is now on CPU.
    pub fn next(&self) -> NonNull<Thread<A>> {
        self.next
    }

    pub fn prev_id(&self) -> ThreadId {
        self.prev_id
    }

    pub fn next_id(&self) -> ThreadId {
        self.next_id
    }

    /// Priority the next thread was dispatched at.
    pub fn priority(&self) -> Priority {
        self.prio
    }

    pub fn source(&self) -> DispatchSource {
        self.source
    }
}

/// Outcome of one timer tick.
#[derive(Debug)]
pub enum Tick<A> {
    /// Keep running the current thread.
    Continue,
    /// Switch machine context as described.
    Switch(Switch<A>),
}

/// Scheduler state of one CPU.
#[derive(Debug)]
pub struct Scheduler<A> {
    config: SchedConfig,
    ticks: u64,
    queues: [RunQueue<A>; 2],
    /// Index of the active queue in `queues`. Flipped to swap.
    active: usize,
    just_queued: VecDeque<Box<Thread<A>>>,
    prefer_just_queued: bool,
    current: Box<Thread<A>>,
    current_prio: Priority,
}

impl<A> Scheduler<A> {
    /// Sets up a CPU's scheduler with `bootstrap` as its running thread.
    ///
    /// `bootstrap` stands for the code path that initializes the CPU. It is
    /// put on CPU at [`Priority::DEFAULT`] without being queued.
    ///
    /// # Panics
    ///
    /// Panics if `bootstrap` has already been scheduled.
    pub fn new(mut bootstrap: Box<Thread<A>>, config: SchedConfig) -> Self {
        assert_eq!(
            bootstrap.state(),
            ThreadState::Invalid,
            "bootstrap thread {} already scheduled",
            bootstrap.id()
        );
        assert!(config.rr_interval > 0, "empty scheduling slice");
        bootstrap.set_state(ThreadState::OnCpu);
        Self {
            config,
            ticks: 0,
            queues: [RunQueue::new(), RunQueue::new()],
            active: 0,
            just_queued: VecDeque::new(),
            prefer_just_queued: true,
            current: bootstrap,
            current_prio: Priority::DEFAULT,
        }
    }

    pub fn config(&self) -> SchedConfig {
        self.config
    }

    /// Ticks seen by this CPU.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The thread on CPU.
    pub fn current(&self) -> &Thread<A> {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Thread<A> {
        &mut self.current
    }

    /// Priority the current thread is running at.
    pub fn current_priority(&self) -> Priority {
        self.current_prio
    }

    pub fn queue_lengths(&self) -> QueueLengths {
        QueueLengths {
            active: self.active().len(),
            expired: self.expired().len(),
            just_queued: self.just_queued.len(),
        }
    }

    fn active(&self) -> &RunQueue<A> {
        &self.queues[self.active]
    }

    fn active_mut(&mut self) -> &mut RunQueue<A> {
        &mut self.queues[self.active]
    }

    fn expired(&self) -> &RunQueue<A> {
        &self.queues[self.active ^ 1]
    }

    fn expired_mut(&mut self) -> &mut RunQueue<A> {
        &mut self.queues[self.active ^ 1]
    }

    /// Makes a new thread runnable on this CPU.
    ///
    /// The thread waits in `just_queued` until it is dispatched or drained
    /// into the active queue.
    ///
    /// # Panics
    ///
    /// Panics if `thread` has already been scheduled. No sleep state exists,
    /// so there is nothing to wake.
    pub fn enqueue_new_or_woken(&mut self, mut thread: Box<Thread<A>>) {
        assert_eq!(
            thread.state(),
            ThreadState::Invalid,
            "thread {} enqueued twice",
            thread.id()
        );
        thread.set_state(ThreadState::Runnable);
        thread.slice_ticks = 0;
        thread.enqueued_at = self.ticks;
        self.just_queued.push_back(thread);
    }

    /// Picks the thread to run next, if any.
    pub(crate) fn dispatch_next(&mut self) -> Option<Dispatch<A>> {
        if self.prefer_just_queued {
            if let Some(thread) = self.just_queued.pop_front() {
                self.prefer_just_queued = false;
                return Some(Dispatch {
                    thread,
                    prio: Priority::DEFAULT,
                    source: DispatchSource::JustQueued,
                });
            }
        }

        if self.active().is_empty() {
            self.active ^= 1;
            let now = self.ticks;
            while let Some(thread) = self.just_queued.pop_front() {
                self.active_mut()
                    .enqueue(thread, Priority::DEFAULT, EnqueueMode::Normal, now);
            }
        }

        let (thread, prio) = self.active_mut().pop_highest()?;
        self.prefer_just_queued = true;
        Some(Dispatch {
            thread,
            prio,
            source: DispatchSource::Active,
        })
    }

    /// Accounts one timer tick to the current thread and decides whether it
    /// keeps the CPU.
    ///
    /// # Panics
    ///
    /// Panics if a thread with a higher priority than the current one waits
    /// in the active queue before the slice has run out. Only waking a
    /// sleeping thread could cause that, and threads never sleep.
    pub fn tick(&mut self) -> Tick<A> {
        self.ticks += 1;

        let prio = self.current_prio;
        let current = &mut *self.current;
        // an idle CPU never resets the slice of its only thread.
        current.slice_ticks = current.slice_ticks.saturating_add(1);
        current.stats.runtime_overall += 1;
        current.stats.prio_map[prio.index()] += 1;

        if current.slice_ticks >= self.config.rr_interval {
            return match self.dispatch_next() {
                Some(next) => Tick::Switch(self.switch_to(next)),
                None => Tick::Continue,
            };
        }

        if let Some(waiting) = self.active().highest_nonempty() {
            assert!(
                waiting <= prio,
                "higher priority thread ({waiting}) appeared while thread {} runs at {prio}",
                self.current.id()
            );
        }

        Tick::Continue
    }

    fn switch_to(&mut self, next: Dispatch<A>) -> Switch<A> {
        let Dispatch {
            mut thread,
            prio,
            source,
        } = next;
        let now = self.ticks;

        thread.set_state(ThreadState::OnCpu);
        thread.stats.dispatch_count += 1;
        thread.stats.rqwait_overall += now - thread.enqueued_at;

        let mut prev = mem::replace(&mut self.current, thread);
        let prev_prio = mem::replace(&mut self.current_prio, prio);
        prev.stats.preempt_slice_end += 1;

        let prev_id = prev.id();
        let prev = NonNull::from(self.expired_mut().enqueue(
            prev,
            prev_prio.demoted(),
            EnqueueMode::Normal,
            now,
        ));
        let next = NonNull::from(&mut *self.current);

        Switch {
            prev,
            next,
            prev_id,
            next_id: self.current.id(),
            prio,
            source,
        }
    }

    /// Iterates over every thread of this CPU, the current one first.
    pub fn threads(&self) -> impl Iterator<Item = (Placement, &Thread<A>)> {
        let current = iter::once((Placement::OnCpu(self.current_prio), &*self.current));
        let active = self.active().iter().map(|(p, t)| (Placement::Active(p), t));
        let expired = self
            .expired()
            .iter()
            .map(|(p, t)| (Placement::Expired(p), t));
        let just_queued = self
            .just_queued
            .iter()
            .map(|t| (Placement::JustQueued, &**t));
        current.chain(active).chain(expired).chain(just_queued)
    }

    /// Checks the per-CPU scheduling invariants.
    ///
    /// # Panics
    ///
    /// Panics describing the first violated invariant.
    pub fn assert_invariants(&self) {
        let mut ids = Vec::new();
        for (placement, thread) in self.threads() {
            let expected = match placement {
                Placement::OnCpu(_) => ThreadState::OnCpu,
                _ => ThreadState::Runnable,
            };
            assert_eq!(
                thread.state(),
                expected,
                "thread {} is {} while {placement:?}",
                thread.id(),
                thread.state()
            );
            ids.push(thread.id());
        }
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total, "thread queued more than once");
    }
}
