//! Exponential backoff for failed operations.
//!
//! Each task that failed transiently has an [`OperationRetryRecord`] keyed by
//! its tag. The task loop skips it until `next_retry_ms`; success deletes the
//! record.

use rand::Rng;
use taler_store::records::OperationRetryRecord;
use taler_store::{record, ReadTxn, StoreError, WriteTxn};
use taler_types::ErrorDetail;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub base: f64,
    pub delta_ms: u64,
    pub max_ms: u64,
    /// Relative jitter, `0.2` spreads delays over ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 1.5,
            delta_ms: 1_000,
            max_ms: 120_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// `min(max, delta * base^counter)`.
    pub fn base_delay_ms(&self, counter: u32) -> u64 {
        let exp = self.base.powi(counter.min(i32::MAX as u32) as i32);
        let delay = self.delta_ms as f64 * exp;
        if !delay.is_finite() || delay >= self.max_ms as f64 {
            self.max_ms
        } else {
            delay as u64
        }
    }

    /// [`base_delay_ms`](Self::base_delay_ms) spread by the jitter.
    pub fn delay_ms<R: Rng + ?Sized>(&self, counter: u32, rng: &mut R) -> u64 {
        let base = self.base_delay_ms(counter) as f64;
        if self.jitter <= 0.0 {
            return base as u64;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        (base * factor).max(0.0) as u64
    }
}

pub fn get_retry<T: ReadTxn + ?Sized>(
    tx: &T,
    tag: &str,
) -> Result<Option<OperationRetryRecord>, StoreError> {
    record::get(tx, tag.as_bytes())
}

/// Count a failure of `tag` and schedule its next attempt.
pub fn record_failure<T: WriteTxn + ?Sized>(
    tx: &mut T,
    tag: &str,
    error: ErrorDetail,
    policy: &RetryPolicy,
    now_ms: u64,
) -> Result<OperationRetryRecord, StoreError> {
    let counter = get_retry(&*tx, tag)?.map(|r| r.retry_counter).unwrap_or(0);
    let delay = policy.delay_ms(counter, &mut rand::thread_rng());
    let retry = OperationRetryRecord {
        tag: tag.to_string(),
        retry_counter: counter.saturating_add(1),
        next_retry_ms: now_ms.saturating_add(delay),
        last_error: Some(error),
    };
    record::put(tx, &retry)?;
    Ok(retry)
}

/// Forget the backoff state of `tag`.
pub fn reset_retry<T: WriteTxn + ?Sized>(tx: &mut T, tag: &str) -> Result<(), StoreError> {
    record::delete::<OperationRetryRecord, T>(tx, tag.as_bytes())
}

/// Make `tag` due immediately while keeping its counter.
pub fn schedule_now<T: WriteTxn + ?Sized>(
    tx: &mut T,
    tag: &str,
    now_ms: u64,
) -> Result<(), StoreError> {
    if let Some(mut retry) = get_retry(&*tx, tag)? {
        retry.next_retry_ms = now_ms;
        record::put(tx, &retry)?;
    }
    Ok(())
}
