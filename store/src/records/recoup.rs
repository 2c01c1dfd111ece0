use serde::{Deserialize, Serialize};
use taler_types::{EddsaPublicKey, ErrorDetail, Timestamp};

use crate::record::Record;
use crate::StoreName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoupStatus {
    Pending,
    RecoupRequested,
    Refunded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoupCoin {
    pub coin_pub: EddsaPublicKey,
    pub status: RecoupStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoupGroupStatus {
    Pending,
    Done,
}

/// Recoup of the coins of revoked denominations of one exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoupGroupRecord {
    pub recoup_group_id: String,
    pub exchange_base_url: String,
    pub coins: Vec<RecoupCoin>,
    pub status: RecoupGroupStatus,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<ErrorDetail>,
}

impl Record for RecoupGroupRecord {
    const STORE: StoreName = StoreName::RecoupGroups;

    fn key(&self) -> Vec<u8> {
        self.recoup_group_id.as_bytes().to_vec()
    }
}
