/// Busy-wait delays.
pub trait Delay {
    /// Waits for at least `ms` milliseconds.
    fn mdelay(&mut self, ms: u32);
}

/// How long a condition is polled before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Number of delays between polls.
    pub polls: u32,
    /// Length of each delay, in milliseconds.
    pub interval_ms: u32,
}

impl PollBudget {
    /// Longest time a poll with this budget may wait.
    #[must_use]
    pub const fn total_ms(self) -> u64 {
        self.polls as u64 * self.interval_ms as u64
    }
}

/// Polls `done` until it returns `true` or `budget` runs out.
///
/// `done` is checked once before the first delay and once after each delay.
/// Returns the last result of `done`.
pub fn poll_with_timeout<D>(delay: &mut D, budget: PollBudget, mut done: impl FnMut() -> bool) -> bool
where
    D: Delay + ?Sized,
{
    for _ in 0..budget.polls {
        if done() {
            return true;
        }
        delay.mdelay(budget.interval_ms);
    }
    done()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Clock(u64);

    impl Delay for Clock {
        fn mdelay(&mut self, ms: u32) {
            self.0 += u64::from(ms);
        }
    }

    const BUDGET: PollBudget = PollBudget {
        polls: 100,
        interval_ms: 1,
    };

    #[test]
    fn satisfied_condition_does_not_wait() {
        let mut clock = Clock::default();
        assert!(poll_with_timeout(&mut clock, BUDGET, || true));
        assert_eq!(clock.0, 0);
    }

    #[test]
    fn stops_polling_once_satisfied() {
        let mut clock = Clock::default();
        let mut calls = 0;
        assert!(poll_with_timeout(&mut clock, BUDGET, || {
            calls += 1;
            calls == 5
        }));
        assert_eq!(clock.0, 4);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut clock = Clock::default();
        assert!(!poll_with_timeout(&mut clock, BUDGET, || false));
        assert_eq!(clock.0, BUDGET.total_ms());
    }
}
