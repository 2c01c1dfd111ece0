use serde::{Deserialize, Serialize};
use taler_types::{
    Amount, BlindingSecret, DenomSignature, EddsaPrivateKey, EddsaPublicKey, HashCode, Timestamp,
};

use crate::record::Record;
use crate::StoreName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinStatus {
    /// Spendable.
    Fresh,
    /// Spent by a deposit or melt.
    Dormant,
    /// The exchange reported it as double spent.
    Forbidden,
}

/// Where a coin came from; recoup depends on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinSource {
    Withdraw {
        withdrawal_group_id: String,
        coin_index: u32,
        reserve_pub: EddsaPublicKey,
    },
    Refresh {
        refresh_group_id: String,
        old_coin_pub: EddsaPublicKey,
        coin_index: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub coin_pub: EddsaPublicKey,
    pub coin_priv: EddsaPrivateKey,
    pub exchange_base_url: String,
    pub denom_pub_hash: HashCode,
    pub denom_sig: DenomSignature,
    pub blinding_secret: BlindingSecret,
    /// Face value of the denomination.
    pub value: Amount,
    pub status: CoinStatus,
    pub source: CoinSource,
    /// Operation that spent the coin, e.g. `deposit:<id>`.
    pub spent_by: Option<String>,
    pub created_at: Timestamp,
}

impl CoinRecord {
    pub fn is_fresh(&self) -> bool {
        self.status == CoinStatus::Fresh
    }
}

impl Record for CoinRecord {
    const STORE: StoreName = StoreName::Coins;

    fn key(&self) -> Vec<u8> {
        self.coin_pub.as_bytes().to_vec()
    }

    fn index_keys(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("exchange", self.exchange_base_url.as_bytes().to_vec()),
            ("denom", self.denom_pub_hash.as_bytes().to_vec()),
        ]
    }
}
