use serde::{Deserialize, Serialize};
use taler_types::{
    Amount, DenomSignature, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, ErrorDetail, HashCode,
    Timestamp,
};

use crate::record::Record;
use crate::StoreName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    Pending,
    /// Deposit permissions computed and cached.
    ContractSigned,
    DepositSent,
    Confirmed,
    Failed,
    Cancelled,
}

impl DepositStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Cancelled)
    }
}

/// One coin's part of a deposit group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCoin {
    pub coin_pub: EddsaPublicKey,
    pub exchange_base_url: String,
    pub denom_pub_hash: HashCode,
    pub contribution: Amount,
    pub fee_deposit: Amount,
    /// The coin keeps a leftover that must be refreshed.
    pub partial: bool,
    /// Coin signature over the deposit request, computed once.
    pub coin_sig: Option<EddsaSignature>,
    pub denom_sig: DenomSignature,
    pub deposited: bool,
    pub exchange_sig: Option<EddsaSignature>,
    pub exchange_pub: Option<EddsaPublicKey>,
}

/// A deposit of coins into the wallet owner's own bank account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositGroupRecord {
    pub deposit_group_id: String,
    pub payto_uri: String,
    pub wire_salt: String,
    pub h_wire: HashCode,
    /// Canonical JSON of the contract terms.
    pub contract_terms: String,
    pub h_contract: HashCode,
    pub merchant_pub: EddsaPublicKey,
    pub merchant_priv: EddsaPrivateKey,
    pub amount: Amount,
    pub total_deposit_fees: Amount,
    /// Amount credited to the bank account.
    pub effective_amount: Amount,
    pub timestamp: Timestamp,
    pub refund_deadline: Timestamp,
    pub coins: Vec<DepositCoin>,
    pub status: DepositStatus,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<ErrorDetail>,
}

impl Record for DepositGroupRecord {
    const STORE: StoreName = StoreName::DepositGroups;

    fn key(&self) -> Vec<u8> {
        self.deposit_group_id.as_bytes().to_vec()
    }
}
