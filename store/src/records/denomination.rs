use serde::{Deserialize, Serialize};
use taler_selection::WithdrawableDenom;
use taler_types::{Amount, DenomPublicKey, EddsaSignature, HashCode, Timestamp};

use crate::record::Record;
use crate::StoreName;

use super::composite_key;

/// One coin type offered by an exchange, keyed by `(exchange, denom_pub_hash)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationRecord {
    pub exchange_base_url: String,
    pub denom_pub: DenomPublicKey,
    pub denom_pub_hash: HashCode,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub fee_deposit: Amount,
    pub fee_refresh: Amount,
    pub fee_refund: Amount,
    pub stamp_start: Timestamp,
    pub stamp_expire_withdraw: Timestamp,
    pub stamp_expire_deposit: Timestamp,
    pub stamp_expire_legal: Timestamp,
    pub master_sig: EddsaSignature,
    /// Listed in the exchange's `recoup` section.
    pub is_revoked: bool,
    /// Present in the most recent `/keys` response.
    pub is_offered: bool,
}

impl DenominationRecord {
    pub fn key_for(exchange_base_url: &str, denom_pub_hash: &HashCode) -> Vec<u8> {
        composite_key(exchange_base_url, denom_pub_hash.as_bytes())
    }

    /// Prefix of all denomination keys of one exchange.
    pub fn exchange_prefix(exchange_base_url: &str) -> Vec<u8> {
        composite_key(exchange_base_url, &[])
    }

    pub fn is_withdrawable(&self, now: Timestamp) -> bool {
        !self.is_revoked && self.is_offered && self.stamp_start <= now && now < self.stamp_expire_withdraw
    }

    pub fn is_depositable(&self, now: Timestamp) -> bool {
        !self.is_revoked && now < self.stamp_expire_deposit
    }

    pub fn is_legally_expired(&self, now: Timestamp) -> bool {
        now >= self.stamp_expire_legal
    }

    pub fn to_withdrawable(&self) -> WithdrawableDenom {
        WithdrawableDenom {
            denom_pub_hash: self.denom_pub_hash,
            value: self.value.clone(),
            fee_withdraw: self.fee_withdraw.clone(),
        }
    }
}

impl Record for DenominationRecord {
    const STORE: StoreName = StoreName::Denominations;

    fn key(&self) -> Vec<u8> {
        Self::key_for(&self.exchange_base_url, &self.denom_pub_hash)
    }
}
