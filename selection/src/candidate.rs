//! Selection inputs and outputs.

use serde::{Deserialize, Serialize};
use taler_types::{Amount, EddsaPublicKey, HashCode, Timestamp};

/// A fresh coin the wallet could spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateCoin {
    pub coin_pub: EddsaPublicKey,
    pub exchange_base_url: String,
    pub denom_pub_hash: HashCode,
    pub value: Amount,
    pub fee_deposit: Amount,
    pub expire_deposit: Timestamp,
}

/// One coin of a payment selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCoin {
    pub coin_pub: EddsaPublicKey,
    pub exchange_base_url: String,
    pub denom_pub_hash: HashCode,
    /// Amount taken from the coin, deposit fee included.
    pub contribution: Amount,
    pub fee_deposit: Amount,
    /// The coin is not fully spent; its leftover must be refreshed.
    pub partial: bool,
}

/// Outcome of a payment selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinSelection {
    pub coins: Vec<SelectedCoin>,
    /// Sum of all contributions.
    pub total_contribution: Amount,
    /// Deposit fees of all selected coins.
    pub total_deposit_fees: Amount,
    /// Fees the customer pays on top of the target (fees beyond the allowance).
    pub customer_fees: Amount,
    pub needs_refresh: bool,
    /// Coins examined by the pass that produced this selection.
    pub iterations: usize,
}

impl CoinSelection {
    pub fn empty(currency: &str) -> Result<Self, taler_types::AmountError> {
        let zero = Amount::zero(currency)?;
        Ok(Self {
            coins: Vec::new(),
            total_contribution: zero.clone(),
            total_deposit_fees: zero.clone(),
            customer_fees: zero,
            needs_refresh: false,
            iterations: 0,
        })
    }
}

/// A denomination that can currently be withdrawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawableDenom {
    pub denom_pub_hash: HashCode,
    pub value: Amount,
    pub fee_withdraw: Amount,
}
