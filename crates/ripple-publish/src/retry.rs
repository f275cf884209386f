//! Retry-interval tables.

use std::collections::BTreeMap;
use std::time::Duration;

/// What to do with a task whose delivery attempt should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Delay in seconds keyed by attempt number.
///
/// Attempt `n` waits `table[n]`; gaps use the nearest lower entry. Attempts
/// beyond the highest key are not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule(BTreeMap<u32, u64>);

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_pairs([(1, 30), (2, 300), (3, 1800)])
    }
}

impl RetrySchedule {
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u64)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    /// A schedule that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn max_attempt(&self) -> Option<u32> {
        self.0.keys().next_back().copied()
    }

    #[must_use]
    pub fn interval(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempt().is_none_or(|max| attempt > max) {
            return None;
        }
        self.0
            .range(..=attempt)
            .next_back()
            .or_else(|| self.0.iter().next())
            .map(|(_, secs)| Duration::from_secs(*secs))
    }

    /// Decide the fate of a task after failed attempt `attempt`.
    ///
    /// `max_attempts` of 0 leaves the limit to the table alone.
    #[must_use]
    pub fn decide(&self, attempt: u32, max_attempts: u32) -> RetryDecision {
        if max_attempts > 0 && attempt >= max_attempts {
            return RetryDecision::GiveUp;
        }
        self.interval(attempt)
            .map_or(RetryDecision::GiveUp, RetryDecision::RetryAfter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, RetryDecision::RetryAfter(Duration::from_secs(30)))]
    #[case(2, RetryDecision::RetryAfter(Duration::from_secs(300)))]
    #[case(3, RetryDecision::RetryAfter(Duration::from_secs(1800)))]
    #[case(4, RetryDecision::GiveUp)]
    fn default_schedule(#[case] attempt: u32, #[case] expected: RetryDecision) {
        assert_eq!(RetrySchedule::default().decide(attempt, 0), expected);
    }

    #[test]
    fn max_attempts_cuts_the_table_short() {
        let schedule = RetrySchedule::default();
        assert_eq!(
            schedule.decide(1, 2),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
        assert_eq!(schedule.decide(2, 2), RetryDecision::GiveUp);
    }

    #[test]
    fn gaps_use_nearest_lower_entry() {
        let schedule = RetrySchedule::from_pairs([(2, 60), (5, 600)]);
        assert_eq!(schedule.interval(1), Some(Duration::from_secs(60)));
        assert_eq!(schedule.interval(3), Some(Duration::from_secs(60)));
        assert_eq!(schedule.interval(5), Some(Duration::from_secs(600)));
        assert_eq!(schedule.interval(6), None);
    }

    #[test]
    fn empty_schedule_never_retries() {
        assert_eq!(RetrySchedule::none().decide(1, 0), RetryDecision::GiveUp);
    }
}
