//! Persisted wallet records, one module per store family.

pub mod coin;
pub mod denomination;
pub mod deposit;
pub mod exchange;
pub mod recoup;
pub mod refresh;
pub mod reserve;
pub mod retry;
pub mod withdrawal;

pub use coin::{CoinRecord, CoinSource, CoinStatus};
pub use denomination::DenominationRecord;
pub use deposit::{DepositCoin, DepositGroupRecord, DepositStatus};
pub use exchange::{
    AuditorInfo, AuditorTrustRecord, ExchangeDetailsRecord, ExchangeRecord, ExchangeTrustRecord,
    ExchangeUpdateStatus, SigningKeyInfo,
};
pub use recoup::{RecoupCoin, RecoupGroupRecord, RecoupGroupStatus, RecoupStatus};
pub use refresh::{
    RefreshCoin, RefreshGroupRecord, RefreshGroupStatus, RefreshReason, RefreshSession,
    RefreshSessionStatus,
};
pub use reserve::{ReserveRecord, ReserveStatus};
pub use retry::OperationRetryRecord;
pub use withdrawal::{PlanchetRecord, WithdrawalGroupRecord, WithdrawalStatus};

/// Primary key made of a string and a binary suffix separated by NUL.
pub(crate) fn composite_key(head: &str, tail: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(head.len() + 1 + tail.len());
    k.extend_from_slice(head.as_bytes());
    k.push(0);
    k.extend_from_slice(tail);
    k
}
