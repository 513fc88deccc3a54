use chrono::{DateTime, Duration, Utc};

/// Longest interval we accept; keeps the chrono conversion in range
const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Minimum-time-between-trades gate
///
/// The only writer of the last trade time. It is advanced solely after an
/// order the account confirmed, and lives for the process lifetime only.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    min_interval: Duration,
    last_trade_time: Option<DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(min_trade_interval_seconds: u64) -> Self {
        let secs = min_trade_interval_seconds.min(MAX_INTERVAL_SECS) as i64;
        Self {
            min_interval: Duration::seconds(secs),
            last_trade_time: None,
        }
    }

    /// True when no trade was recorded yet or the interval has fully elapsed
    pub fn can_trade(&self, now: DateTime<Utc>) -> bool {
        match self.last_trade_time {
            None => true,
            Some(last) => now - last >= self.min_interval,
        }
    }

    /// Call only after the account confirmed the order
    pub fn record_trade(&mut self, now: DateTime<Utc>) {
        self.last_trade_time = Some(now);
    }

    /// Time left until `can_trade` turns true; zero when already tradeable
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.last_trade_time {
            Some(last) if !self.can_trade(now) => self.min_interval - (now - last),
            _ => Duration::zero(),
        }
    }

    /// `remaining` in whole seconds, rounded up so a blocked trade never reports 0
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        let millis = self.remaining(now).num_milliseconds();
        (millis + 999) / 1000
    }

    pub fn last_trade_time(&self) -> Option<DateTime<Utc>> {
        self.last_trade_time
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_can_trade_before_any_trade() {
        let tracker = CooldownTracker::new(300);
        assert!(tracker.can_trade(t0()));
        assert_eq!(tracker.remaining(t0()), Duration::zero());
        assert_eq!(tracker.last_trade_time(), None);
    }

    #[test]
    fn test_blocked_immediately_after_trade() {
        let mut tracker = CooldownTracker::new(300);
        tracker.record_trade(t0());

        assert!(!tracker.can_trade(t0()));
        assert!(!tracker.can_trade(t0() + Duration::seconds(1)));
        assert!(!tracker.can_trade(t0() + Duration::milliseconds(299_999)));
        assert_eq!(tracker.remaining(t0() + Duration::seconds(100)), Duration::seconds(200));
    }

    #[test]
    fn test_allowed_exactly_at_boundary_and_after() {
        let mut tracker = CooldownTracker::new(300);
        tracker.record_trade(t0());

        assert!(tracker.can_trade(t0() + Duration::seconds(300)));
        assert!(tracker.can_trade(t0() + Duration::seconds(301)));
        assert!(tracker.can_trade(t0() + Duration::days(1)));
        assert_eq!(tracker.remaining(t0() + Duration::seconds(300)), Duration::zero());
    }

    #[test]
    fn test_remaining_secs_rounds_up() {
        let mut tracker = CooldownTracker::new(300);
        tracker.record_trade(t0());

        let almost = t0() + Duration::milliseconds(299_100);
        assert!(!tracker.can_trade(almost));
        assert_eq!(tracker.remaining_secs(almost), 1);
        assert_eq!(tracker.remaining_secs(t0() + Duration::seconds(100)), 200);
        assert_eq!(tracker.remaining_secs(t0() + Duration::seconds(300)), 0);
    }

    #[test]
    fn test_new_trade_restarts_window() {
        let mut tracker = CooldownTracker::new(60);
        tracker.record_trade(t0());
        tracker.record_trade(t0() + Duration::seconds(60));

        assert!(!tracker.can_trade(t0() + Duration::seconds(90)));
        assert!(tracker.can_trade(t0() + Duration::seconds(120)));
    }

    #[test]
    fn test_zero_interval_never_blocks() {
        let mut tracker = CooldownTracker::new(0);
        tracker.record_trade(t0());
        assert!(tracker.can_trade(t0()));
    }

    #[test]
    fn test_huge_interval_is_clamped() {
        let tracker = CooldownTracker::new(u64::MAX);
        assert_eq!(tracker.min_interval(), Duration::seconds(MAX_INTERVAL_SECS as i64));
    }
}
