//! Logical store names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical key-value store. Transactions declare up front which stores
/// they touch.
///
/// The derived `Ord` is the canonical lock order used by backends that lock
/// per store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreName {
    Exchanges,
    ExchangeDetails,
    Denominations,
    Coins,
    Reserves,
    WithdrawalGroups,
    Planchets,
    RefreshGroups,
    DepositGroups,
    RecoupGroups,
    OperationRetries,
    ExchangeTrust,
    AuditorTrust,
    Meta,
}

impl StoreName {
    pub const ALL: [StoreName; 14] = [
        StoreName::Exchanges,
        StoreName::ExchangeDetails,
        StoreName::Denominations,
        StoreName::Coins,
        StoreName::Reserves,
        StoreName::WithdrawalGroups,
        StoreName::Planchets,
        StoreName::RefreshGroups,
        StoreName::DepositGroups,
        StoreName::RecoupGroups,
        StoreName::OperationRetries,
        StoreName::ExchangeTrust,
        StoreName::AuditorTrust,
        StoreName::Meta,
    ];

    /// Name of the backing table.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreName::Exchanges => "exchanges",
            StoreName::ExchangeDetails => "exchange_details",
            StoreName::Denominations => "denominations",
            StoreName::Coins => "coins",
            StoreName::Reserves => "reserves",
            StoreName::WithdrawalGroups => "withdrawal_groups",
            StoreName::Planchets => "planchets",
            StoreName::RefreshGroups => "refresh_groups",
            StoreName::DepositGroups => "deposit_groups",
            StoreName::RecoupGroups => "recoup_groups",
            StoreName::OperationRetries => "operation_retries",
            StoreName::ExchangeTrust => "exchange_trust",
            StoreName::AuditorTrust => "auditor_trust",
            StoreName::Meta => "meta",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
