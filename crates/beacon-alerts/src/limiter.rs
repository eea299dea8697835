//! Cooldown gate for repeat alerts.

use chrono::{DateTime, Duration, Utc};

/// Suppresses a repeated task until a minimum interval has passed.
///
/// The limiter holds only the time the task was last performed. Asking
/// whether the task may run never changes that state; only
/// [`RateLimiter::did_task_at`] does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiter {
    interval: Duration,
    last_performed: Option<DateTime<Utc>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum interval between tasks.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_performed: None,
        }
    }

    /// Creates a limiter with an interval given in whole seconds.
    #[must_use]
    pub fn from_secs(seconds: u64) -> Self {
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        Self::new(Duration::try_seconds(seconds).unwrap_or(Duration::MAX))
    }

    /// Returns the minimum interval between tasks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns when the task was last performed.
    #[must_use]
    pub const fn last_performed(&self) -> Option<DateTime<Utc>> {
        self.last_performed
    }

    /// Returns true if the task may be performed at `now`.
    #[must_use]
    pub fn can_do_task_at(&self, now: DateTime<Utc>) -> bool {
        self.last_performed
            .is_none_or(|last| now.signed_duration_since(last) >= self.interval)
    }

    /// Returns true if the task may be performed now.
    #[must_use]
    pub fn can_do_task(&self) -> bool {
        self.can_do_task_at(Utc::now())
    }

    /// Records that the task was performed at `now`.
    pub fn did_task_at(&mut self, now: DateTime<Utc>) {
        self.last_performed = Some(now);
    }

    /// Records that the task was performed now.
    pub fn did_task(&mut self) {
        self.did_task_at(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn fresh_limiter_allows() {
        let limiter = RateLimiter::from_secs(300);
        assert!(limiter.can_do_task_at(at(0)));
        assert!(limiter.last_performed().is_none());
    }

    #[test]
    fn cooldown_blocks_then_allows() {
        let mut limiter = RateLimiter::from_secs(300);
        limiter.did_task_at(at(1_000));
        assert!(!limiter.can_do_task_at(at(1_000)));
        assert!(!limiter.can_do_task_at(at(1_299)));
        assert!(limiter.can_do_task_at(at(1_300)));
        assert!(limiter.can_do_task_at(at(5_000)));
    }

    #[test]
    fn zero_interval_always_allows() {
        let mut limiter = RateLimiter::from_secs(0);
        limiter.did_task_at(at(10));
        assert!(limiter.can_do_task_at(at(10)));
    }

    #[test]
    fn asking_does_not_change_state() {
        let mut limiter = RateLimiter::from_secs(60);
        limiter.did_task_at(at(100));
        let before = limiter.clone();
        for _ in 0..5 {
            let _ = limiter.can_do_task_at(at(130));
        }
        assert_eq!(limiter, before);
    }

    #[test]
    fn huge_interval_saturates() {
        let limiter = RateLimiter::from_secs(u64::MAX);
        assert_eq!(limiter.interval(), Duration::MAX);
    }

    proptest! {
        #[test]
        fn allows_exactly_after_interval(interval in 0u64..10_000, start in 0i64..1_000_000, wait in 0i64..20_000) {
            let mut limiter = RateLimiter::from_secs(interval);
            limiter.did_task_at(at(start));
            let allowed = limiter.can_do_task_at(at(start + wait));
            prop_assert_eq!(allowed, wait >= i64::try_from(interval).expect("small interval"));
        }
    }
}
