//! Nullable clock: deterministic time for testing.

use std::sync::atomic::{AtomicU64, Ordering};

use taler_types::{Clock, Timestamp};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Shareable across tasks.
#[derive(Debug, Default)]
pub struct NullClock {
    millis: AtomicU64,
}

impl NullClock {
    pub fn new(initial_secs: u64) -> Self {
        Self::from_millis(initial_secs.saturating_mul(1000))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Advance time by a number of seconds.
    pub fn advance(&self, secs: u64) {
        self.advance_millis(secs.saturating_mul(1000));
    }

    pub fn advance_millis(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, ts: Timestamp) {
        self.millis
            .store(ts.as_secs().saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_on_request() {
        let clock = NullClock::new(1_000);
        assert_eq!(clock.now(), Timestamp::new(1_000));
        clock.advance(5);
        clock.advance_millis(1_500);
        assert_eq!(clock.now_millis(), 1_006_500);
        assert_eq!(clock.now(), Timestamp::new(1_006));
    }

    #[test]
    fn set_overrides() {
        let clock = NullClock::new(10);
        clock.set(Timestamp::new(3));
        assert_eq!(clock.now_millis(), 3_000);
    }
}
