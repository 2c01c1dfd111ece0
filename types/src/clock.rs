//! Time source abstraction.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::Timestamp;

/// A source of wall-clock time. Retry scheduling works in milliseconds,
/// protocol timestamps in seconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    fn now(&self) -> Timestamp {
        Timestamp::new(self.now_millis() / 1000)
    }
}

/// The operating system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
