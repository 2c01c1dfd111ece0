use serde::{Deserialize, Serialize};
use taler_selection::DenomSelection;
use taler_types::{
    Amount, BlindedPlanchet, BlindingSecret, EddsaPrivateKey, EddsaPublicKey, EddsaSignature,
    ErrorDetail, HashCode, SecretSeed, Timestamp,
};

use crate::record::Record;
use crate::StoreName;

use super::composite_key;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    PlanchetsCreated,
    BlindedSigSent,
    UnblindedAndStored,
    Done,
    Failed,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalGroupRecord {
    pub withdrawal_group_id: String,
    pub reserve_pub: EddsaPublicKey,
    pub exchange_base_url: String,
    /// Every planchet of the group is derived from this seed.
    pub secret_seed: SecretSeed,
    /// Amount taken from the reserve, withdrawal fees included.
    pub raw_amount: Amount,
    /// Face value of the coins obtained.
    pub effective_amount: Amount,
    pub denoms_sel: DenomSelection,
    pub status: WithdrawalStatus,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<ErrorDetail>,
}

impl Record for WithdrawalGroupRecord {
    const STORE: StoreName = StoreName::WithdrawalGroups;

    fn key(&self) -> Vec<u8> {
        self.withdrawal_group_id.as_bytes().to_vec()
    }

    fn index_keys(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![("reserve", self.reserve_pub.as_bytes().to_vec())]
    }
}

/// One coin-to-be of a withdrawal group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanchetRecord {
    pub withdrawal_group_id: String,
    pub coin_index: u32,
    pub coin_pub: EddsaPublicKey,
    pub coin_priv: EddsaPrivateKey,
    pub blinding_secret: BlindingSecret,
    pub denom_pub_hash: HashCode,
    pub blinded: BlindedPlanchet,
    pub coin_ev_hash: HashCode,
    /// Face value plus withdrawal fee.
    pub amount_with_fee: Amount,
    pub reserve_sig: EddsaSignature,
    pub withdrawal_done: bool,
    pub last_error: Option<ErrorDetail>,
}

impl PlanchetRecord {
    pub fn key_for(withdrawal_group_id: &str, coin_index: u32) -> Vec<u8> {
        composite_key(withdrawal_group_id, &coin_index.to_be_bytes())
    }

    pub fn group_prefix(withdrawal_group_id: &str) -> Vec<u8> {
        composite_key(withdrawal_group_id, &[])
    }
}

impl Record for PlanchetRecord {
    const STORE: StoreName = StoreName::Planchets;

    fn key(&self) -> Vec<u8> {
        Self::key_for(&self.withdrawal_group_id, self.coin_index)
    }
}
