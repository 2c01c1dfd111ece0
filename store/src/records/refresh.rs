use serde::{Deserialize, Serialize};
use taler_selection::DenomSelection;
use taler_types::{Amount, EddsaPublicKey, ErrorDetail, HashCode, SecretSeed, Timestamp};

use crate::record::Record;
use crate::StoreName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshReason {
    /// Leftover of a partially spent coin.
    PayDeposit,
    Manual,
    /// Value credited back to an old coin by recoup.
    Recoup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshSessionStatus {
    Pending,
    MeltSent,
    /// The exchange committed to the melt and picked the index kept secret.
    /// From here on the session must be revealed.
    MeltConfirmed,
    NewPlanchetsRevealed,
    /// Nothing to refresh: the leftover does not cover fees.
    Skipped,
    Failed,
}

impl RefreshSessionStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::NewPlanchetsRevealed | Self::Skipped | Self::Failed)
    }
}

/// Melt of one old coin into new coins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshSession {
    /// Transfer keys and planchets of all `kappa` sets derive from this.
    pub session_seed: SecretSeed,
    pub kappa: u32,
    pub new_denoms: DenomSelection,
    /// Commitment over all planchet sets.
    pub rc: HashCode,
    pub noreveal_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshCoin {
    pub coin_pub: EddsaPublicKey,
    /// Value melted from the coin, melt fee included.
    pub amount_melt: Amount,
    pub status: RefreshSessionStatus,
    pub session: Option<RefreshSession>,
    pub last_error: Option<ErrorDetail>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshGroupStatus {
    Pending,
    Done,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshGroupRecord {
    pub refresh_group_id: String,
    pub reason: RefreshReason,
    pub currency: String,
    pub coins: Vec<RefreshCoin>,
    /// Value of the new coins, estimated at creation.
    pub estimated_output: Amount,
    pub status: RefreshGroupStatus,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<ErrorDetail>,
}

impl RefreshGroupRecord {
    /// True once any session reached `MeltConfirmed`, after which the group
    /// can no longer be cancelled.
    pub fn has_confirmed_melt(&self) -> bool {
        self.coins.iter().any(|c| {
            matches!(
                c.status,
                RefreshSessionStatus::MeltConfirmed | RefreshSessionStatus::NewPlanchetsRevealed
            )
        })
    }

    pub fn all_sessions_final(&self) -> bool {
        self.coins.iter().all(|c| c.status.is_final())
    }
}

impl Record for RefreshGroupRecord {
    const STORE: StoreName = StoreName::RefreshGroups;

    fn key(&self) -> Vec<u8> {
        self.refresh_group_id.as_bytes().to_vec()
    }
}
