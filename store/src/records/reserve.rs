use serde::{Deserialize, Serialize};
use taler_types::{Amount, EddsaPrivateKey, EddsaPublicKey, ErrorDetail, Timestamp};

use crate::record::Record;
use crate::StoreName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveStatus {
    /// Waiting for the bank transfer to arrive.
    WaitingForFunds,
    /// Funds seen and a withdrawal group created for them.
    Withdrawing,
    /// Nothing left to withdraw.
    Dormant,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReserveRecord {
    pub reserve_pub: EddsaPublicKey,
    pub reserve_priv: EddsaPrivateKey,
    pub exchange_base_url: String,
    pub instructed_amount: Amount,
    pub status: ReserveStatus,
    pub created_at: Timestamp,
    /// Balance reported by the last `GET /reserves/{pub}`.
    pub last_known_balance: Option<Amount>,
    pub withdrawal_group_ids: Vec<String>,
    /// Test bank that funds the reserve, `None` for manually funded reserves.
    pub bank_base_url: Option<String>,
    /// The bank already credited this reserve.
    pub bank_credited: bool,
    pub last_error: Option<ErrorDetail>,
}

impl Record for ReserveRecord {
    const STORE: StoreName = StoreName::Reserves;

    fn key(&self) -> Vec<u8> {
        self.reserve_pub.as_bytes().to_vec()
    }

    fn index_keys(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![("exchange", self.exchange_base_url.as_bytes().to_vec())]
    }
}
