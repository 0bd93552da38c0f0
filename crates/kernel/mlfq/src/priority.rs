use cute_kernel_params::{DEFAULT_PRIO, MAX_PRIO, MIN_PRIO, PRIO_LEVELS};

/// Scheduling priority. Larger values are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub struct Priority(u8);

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Priority {
    pub const MIN: Self = Self(MIN_PRIO);
    pub const MAX: Self = Self(MAX_PRIO);
    pub const DEFAULT: Self = Self(DEFAULT_PRIO);

    /// Number of distinct priorities.
    pub const LEVELS: usize = PRIO_LEVELS;

    /// Returns the priority closest to `value`.
    #[must_use]
    pub const fn clamped(value: i32) -> Self {
        if value < MIN_PRIO as i32 {
            Self::MIN
        } else if value > MAX_PRIO as i32 {
            Self::MAX
        } else {
            #[expect(clippy::cast_possible_truncation)]
            let value = value as u8;
            Self(value)
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the priority one level lower, floored at [`Priority::MIN`].
    #[must_use]
    pub const fn demoted(self) -> Self {
        Self::clamped(self.0 as i32 - 1)
    }

    /// Returns the bucket index of this priority.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 - MIN_PRIO) as usize
    }

    /// Iterates over all priorities, highest first.
    pub fn iter_desc() -> impl Iterator<Item = Self> {
        (MIN_PRIO..=MAX_PRIO).rev().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demotion_floors_at_min() {
        assert_eq!(Priority::DEFAULT.demoted().get(), DEFAULT_PRIO - 1);
        assert_eq!(Priority::MIN.demoted(), Priority::MIN);

        let mut p = Priority::MAX;
        for _ in 0..2 * Priority::LEVELS {
            p = p.demoted();
        }
        assert_eq!(p, Priority::MIN);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(Priority::clamped(i32::from(DEFAULT_PRIO)), Priority::DEFAULT);
        assert_eq!(Priority::clamped(-5), Priority::MIN);
        assert_eq!(Priority::clamped(1000), Priority::MAX);
    }

    #[test]
    fn descending_iteration_covers_every_bucket() {
        let all = Priority::iter_desc().collect::<Vec<_>>();
        assert_eq!(all.len(), Priority::LEVELS);
        assert_eq!(all.first(), Some(&Priority::MAX));
        assert_eq!(all.last(), Some(&Priority::MIN));
        assert!(all.windows(2).all(|w| w[0] > w[1]));
    }
}
