// Freshness classification for raw fragments, plus the wall clock collectors are fed from.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Window observed for every subsystem.
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(120);

/// `now - captured_at < window`.
///
/// A capture time in the future (clock skew between hosts) counts as recent.
pub fn is_recent(captured_at: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(captured_at);
    match TimeDelta::from_std(window) {
        Ok(window) => age < window,
        // Window beyond chrono's range: nothing is old enough to be stale.
        Err(_) => true,
    }
}

/// Source of "now" for a pass.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn inside_window_is_recent() {
        assert!(is_recent(at(1000), Duration::from_secs(120), at(1119)));
    }

    #[test]
    fn exactly_at_window_is_stale() {
        assert!(!is_recent(at(1000), Duration::from_secs(120), at(1120)));
    }

    #[test]
    fn past_window_is_stale() {
        assert!(!is_recent(at(1000), Duration::from_secs(120), at(1600)));
    }

    #[test]
    fn future_capture_is_recent() {
        assert!(is_recent(at(2000), Duration::from_secs(120), at(1000)));
    }

    #[test]
    fn zero_window_is_never_recent_for_present_data() {
        assert!(!is_recent(at(1000), Duration::ZERO, at(1000)));
    }
}
