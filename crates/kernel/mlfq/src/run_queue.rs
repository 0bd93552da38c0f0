use alloc::{boxed::Box, collections::VecDeque};

use crate::{Priority, Thread, ThreadState};

/// How [`RunQueue::enqueue()`] places a thread in its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueMode {
    /// Start a new slice at the tail of the bucket.
    Normal,
    /// Resume the interrupted slice at the head of the bucket.
    Return,
}

/// FIFO lists of runnable threads, one per priority.
#[derive(Debug)]
pub struct RunQueue<A> {
    buckets: [VecDeque<Box<Thread<A>>>; Priority::LEVELS],
    len: usize,
}

impl<A> Default for RunQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> RunQueue<A> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buckets: [const { VecDeque::new() }; Priority::LEVELS],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.highest_nonempty().is_none()
    }

    /// Returns the highest priority that has a waiting thread.
    pub fn highest_nonempty(&self) -> Option<Priority> {
        Priority::iter_desc().find(|p| !self.buckets[p.index()].is_empty())
    }

    /// Adds `thread` to the bucket of `prio`.
    ///
    /// The thread becomes [`ThreadState::Runnable`] and is stamped with `now`
    /// as its queue entry time.
    pub fn enqueue(
        &mut self,
        mut thread: Box<Thread<A>>,
        prio: Priority,
        mode: EnqueueMode,
        now: u64,
    ) -> &mut Thread<A> {
        thread.set_state(ThreadState::Runnable);
        thread.enqueued_at = now;

        let bucket = &mut self.buckets[prio.index()];
        self.len += 1;
        match mode {
            EnqueueMode::Normal => {
                thread.slice_ticks = 0;
                bucket.push_back(thread);
                &mut **bucket.back_mut().unwrap_or_else(|| unreachable!())
            }
            EnqueueMode::Return => {
                bucket.push_front(thread);
                &mut **bucket.front_mut().unwrap_or_else(|| unreachable!())
            }
        }
    }

    /// Removes the first thread of the highest non-empty bucket.
    pub fn pop_highest(&mut self) -> Option<(Box<Thread<A>>, Priority)> {
        let prio = self.highest_nonempty()?;
        let thread = self.buckets[prio.index()].pop_front()?;
        self.len -= 1;
        Some((thread, prio))
    }

    /// Iterates over the queued threads, highest priority first, FIFO order
    /// within a bucket.
    pub fn iter(&self) -> impl Iterator<Item = (Priority, &Thread<A>)> {
        Priority::iter_desc()
            .flat_map(move |p| self.buckets[p.index()].iter().map(move |t| (p, &**t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThreadId;

    fn thread() -> Box<Thread<()>> {
        Box::new(Thread::new(()))
    }

    fn ids(rq: &RunQueue<()>) -> Vec<(u8, ThreadId)> {
        rq.iter().map(|(p, t)| (p.get(), t.id())).collect()
    }

    #[test]
    fn empty_queue_has_no_priority() {
        let rq = RunQueue::<()>::new();
        assert!(rq.is_empty());
        assert_eq!(rq.highest_nonempty(), None);
        assert_eq!(rq.len(), 0);
    }

    #[test]
    fn highest_bucket_is_served_first() {
        let mut rq = RunQueue::new();
        let low = thread();
        let high = thread();
        let (low_id, high_id) = (low.id(), high.id());
        rq.enqueue(low, Priority::MIN, EnqueueMode::Normal, 0);
        rq.enqueue(high, Priority::MAX, EnqueueMode::Normal, 0);
        assert_eq!(rq.highest_nonempty(), Some(Priority::MAX));

        let (t, p) = rq.pop_highest().unwrap();
        assert_eq!((t.id(), p), (high_id, Priority::MAX));
        let (t, p) = rq.pop_highest().unwrap();
        assert_eq!((t.id(), p), (low_id, Priority::MIN));
        assert!(rq.pop_highest().is_none());
    }

    #[test]
    fn normal_mode_appends_and_starts_new_slice() {
        let mut rq = RunQueue::new();
        let a = thread();
        let mut b = thread();
        b.slice_ticks = 7;
        let (a_id, b_id) = (a.id(), b.id());

        rq.enqueue(a, Priority::DEFAULT, EnqueueMode::Normal, 3);
        let b = rq.enqueue(b, Priority::DEFAULT, EnqueueMode::Normal, 5);
        assert_eq!(b.slice_ticks(), 0);
        assert_eq!(b.enqueued_at(), 5);
        assert_eq!(b.state(), ThreadState::Runnable);

        let d = Priority::DEFAULT.get();
        assert_eq!(ids(&rq), [(d, a_id), (d, b_id)]);
    }

    #[test]
    fn return_mode_prepends_and_keeps_slice() {
        let mut rq = RunQueue::new();
        let a = thread();
        let mut b = thread();
        b.slice_ticks = 1;
        let (a_id, b_id) = (a.id(), b.id());

        rq.enqueue(a, Priority::DEFAULT, EnqueueMode::Normal, 0);
        let b = rq.enqueue(b, Priority::DEFAULT, EnqueueMode::Return, 9);
        assert_eq!(b.slice_ticks(), 1);
        assert_eq!(b.enqueued_at(), 9);

        let d = Priority::DEFAULT.get();
        assert_eq!(ids(&rq), [(d, b_id), (d, a_id)]);
        assert_eq!(rq.len(), 2);
    }
}
