//! Protocol timestamps.
//!
//! Timestamps are Unix epoch seconds (UTC). `Timestamp::NEVER` stands for
//! "no deadline" and compares greater than every real time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Unix timestamp in seconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    /// A time that never arrives.
    pub const NEVER: Self = Self(u64::MAX);

    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn is_never(&self) -> bool {
        self.0 == u64::MAX
    }

    /// This timestamp shifted forward; `NEVER` stays `NEVER`.
    pub fn add_secs(&self, secs: u64) -> Self {
        if self.is_never() {
            return *self;
        }
        Self(self.0.saturating_add(secs))
    }

    /// Seconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Whether this timestamp + duration has passed relative to `now`.
    pub fn has_expired(&self, duration_secs: u64, now: Timestamp) -> bool {
        !self.is_never() && now.0 >= self.0.saturating_add(duration_secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}s", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_greatest() {
        assert!(Timestamp::NEVER > Timestamp::new(u64::MAX - 1));
        assert_eq!(Timestamp::NEVER.add_secs(10), Timestamp::NEVER);
        assert!(!Timestamp::NEVER.has_expired(0, Timestamp::new(5)));
    }

    #[test]
    fn has_expired_boundary() {
        let t = Timestamp::new(100);
        assert!(!t.has_expired(10, Timestamp::new(109)));
        assert!(t.has_expired(10, Timestamp::new(110)));
    }

    #[test]
    fn display() {
        assert_eq!(Timestamp::new(5).to_string(), "5s");
        assert_eq!(Timestamp::NEVER.to_string(), "never");
    }
}
