//! Per-origin request limiter using the token bucket algorithm.
//!
//! Every origin (scheme, host, port) gets three buckets: 50 requests per
//! second, 100 per minute and 1000 per hour. Buckets refill continuously in
//! proportion to elapsed time and are capped at their window maximum. A
//! request is allowed only if every bucket holds at least one token, and then
//! debits one token from each.

use std::collections::HashMap;
use std::time::Instant;

use tracing::warn;
use url::Url;

use crate::NetworkError;

pub const MAX_PER_SECOND: f64 = 50.0;
pub const MAX_PER_MINUTE: f64 = 100.0;
pub const MAX_PER_HOUR: f64 = 1000.0;

#[derive(Clone, Debug)]
struct OriginState {
    per_second: f64,
    per_minute: f64,
    per_hour: f64,
    last_update: Instant,
}

impl OriginState {
    fn new(now: Instant) -> Self {
        Self {
            per_second: MAX_PER_SECOND,
            per_minute: MAX_PER_MINUTE,
            per_hour: MAX_PER_HOUR,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.per_second = (self.per_second + elapsed * MAX_PER_SECOND).min(MAX_PER_SECOND);
        self.per_minute = (self.per_minute + elapsed * MAX_PER_MINUTE / 60.0).min(MAX_PER_MINUTE);
        self.per_hour = (self.per_hour + elapsed * MAX_PER_HOUR / 3600.0).min(MAX_PER_HOUR);
        self.last_update = now;
    }

    fn has_token(&self) -> bool {
        self.per_second >= 1.0 && self.per_minute >= 1.0 && self.per_hour >= 1.0
    }

    fn debit(&mut self) {
        self.per_second -= 1.0;
        self.per_minute -= 1.0;
        self.per_hour -= 1.0;
    }
}

/// Remaining tokens of an origin. Useful for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct ThrottleStats {
    pub origin: String,
    pub per_second: f64,
    pub per_minute: f64,
    pub per_hour: f64,
}

#[derive(Default)]
pub struct RequestThrottler {
    origins: HashMap<String, OriginState>,
}

/// Origin key of a URL: `scheme://host[:port]`.
pub fn origin_of(url: &str) -> Result<String, NetworkError> {
    let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))?;
    Ok(parsed.origin().ascii_serialization())
}

impl RequestThrottler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refill the origin's buckets and take one token.
    ///
    /// Returns `Err(Throttled)` if any bucket is empty; nothing is debited then.
    pub fn apply_throttle(&mut self, url: &str) -> Result<(), NetworkError> {
        self.apply_throttle_at(url, Instant::now())
    }

    pub fn apply_throttle_at(&mut self, url: &str, now: Instant) -> Result<(), NetworkError> {
        let origin = origin_of(url)?;
        let state = self
            .origins
            .entry(origin.clone())
            .or_insert_with(|| OriginState::new(now));
        state.refill(now);
        if !state.has_token() {
            warn!(
                origin = %origin,
                per_second = state.per_second,
                per_minute = state.per_minute,
                per_hour = state.per_hour,
                "request throttled"
            );
            return Err(NetworkError::Throttled { origin });
        }
        state.debit();
        Ok(())
    }

    /// Current bucket levels of the URL's origin, if it was ever used.
    pub fn throttle_stats(&self, url: &str) -> Option<ThrottleStats> {
        let origin = origin_of(url).ok()?;
        self.origins.get(&origin).map(|s| ThrottleStats {
            origin,
            per_second: s.per_second,
            per_minute: s.per_minute,
            per_hour: s.per_hour,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const URL: &str = "https://exchange.example.com/keys";

    #[test]
    fn fifty_first_request_in_a_second_is_throttled() {
        let mut t = RequestThrottler::new();
        let start = Instant::now();
        for _ in 0..50 {
            t.apply_throttle_at(URL, start).unwrap();
        }
        assert_eq!(
            t.apply_throttle_at(URL, start),
            Err(NetworkError::Throttled {
                origin: "https://exchange.example.com".into()
            })
        );
        t.apply_throttle_at(URL, start + Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn denied_request_debits_nothing() {
        let mut t = RequestThrottler::new();
        let start = Instant::now();
        for _ in 0..50 {
            t.apply_throttle_at(URL, start).unwrap();
        }
        let before = t.throttle_stats(URL).unwrap();
        assert!(t.apply_throttle_at(URL, start).is_err());
        assert_eq!(t.throttle_stats(URL).unwrap(), before);
    }

    #[test]
    fn minute_window_limits_sustained_rate() {
        let mut t = RequestThrottler::new();
        let start = Instant::now();
        let mut allowed = 0;
        // 200 requests spread over 4 seconds: the per-second bucket keeps
        // up, the per-minute bucket does not.
        for i in 0..200u64 {
            let now = start + Duration::from_millis(i * 20);
            if t.apply_throttle_at(URL, now).is_ok() {
                allowed += 1;
            }
        }
        assert!(allowed >= 100 && allowed < 110, "allowed {allowed}");
    }

    #[test]
    fn origins_are_independent() {
        let mut t = RequestThrottler::new();
        let start = Instant::now();
        for _ in 0..50 {
            t.apply_throttle_at(URL, start).unwrap();
        }
        t.apply_throttle_at("https://other.example.com/keys", start).unwrap();
        // Same origin, different path.
        assert!(t
            .apply_throttle_at("https://exchange.example.com/reserves/X", start)
            .is_err());
    }

    #[test]
    fn buckets_are_capped() {
        let mut t = RequestThrottler::new();
        let start = Instant::now();
        t.apply_throttle_at(URL, start).unwrap();
        t.apply_throttle_at(URL, start + Duration::from_secs(7200)).unwrap();
        let stats = t.throttle_stats(URL).unwrap();
        assert!(stats.per_second <= MAX_PER_SECOND);
        assert!(stats.per_hour <= MAX_PER_HOUR);
    }

    #[test]
    fn invalid_url_is_rejected() {
        let mut t = RequestThrottler::new();
        assert!(matches!(
            t.apply_throttle("not a url"),
            Err(NetworkError::InvalidUrl(_))
        ));
        assert!(t.throttle_stats("not a url").is_none());
    }
}
