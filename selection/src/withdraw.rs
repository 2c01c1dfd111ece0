//! Denomination selection for withdrawals and refresh outputs.

use serde::{Deserialize, Serialize};
use taler_types::{Amount, HashCode};

use crate::candidate::WithdrawableDenom;
use crate::SelectionError;

/// Upper bound on coins produced by a single selection.
pub const MAX_COINS_PER_SELECTION: u32 = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedDenom {
    pub denom_pub_hash: HashCode,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomSelection {
    pub selected: Vec<SelectedDenom>,
    /// Face value of all selected coins.
    pub total_coin_value: Amount,
    /// Face value plus withdrawal fees.
    pub total_withdraw_cost: Amount,
}

impl DenomSelection {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn coin_count(&self) -> u32 {
        self.selected.iter().map(|s| s.count).sum()
    }
}

/// Greedily pick denominations, largest first, such that value plus
/// withdrawal fee of all picked coins stays within `amount`.
///
/// The result may be empty when no denomination fits.
pub fn select_withdrawal_denoms(
    amount: &Amount,
    denoms: &[WithdrawableDenom],
) -> Result<DenomSelection, SelectionError> {
    let currency = amount.currency();
    let mut usable: Vec<&WithdrawableDenom> = denoms
        .iter()
        .filter(|d| d.value.currency() == currency && d.fee_withdraw.currency() == currency)
        .filter(|d| !d.value.is_zero())
        .collect();
    usable.sort_by(|a, b| {
        b.value
            .to_units()
            .cmp(&a.value.to_units())
            .then(a.fee_withdraw.to_units().cmp(&b.fee_withdraw.to_units()))
    });

    let mut remaining = amount.to_units();
    let mut coins_left = MAX_COINS_PER_SELECTION as u128;
    let mut value = 0u128;
    let mut cost = 0u128;
    let mut selected = Vec::new();
    for d in usable {
        let unit_cost = d.value.to_units() + d.fee_withdraw.to_units();
        let count = (remaining / unit_cost).min(coins_left);
        if count == 0 {
            continue;
        }
        remaining -= count * unit_cost;
        coins_left -= count;
        value += count * d.value.to_units();
        cost += count * unit_cost;
        selected.push(SelectedDenom {
            denom_pub_hash: d.denom_pub_hash,
            count: count as u32,
        });
    }

    Ok(DenomSelection {
        selected,
        total_coin_value: Amount::from_units(currency, value)?,
        total_withdraw_cost: Amount::from_units(currency, cost)?,
    })
}

/// New coins to obtain when refreshing `leftover`, after paying `fee_refresh`.
///
/// `None` when the leftover does not cover the fee or no denomination fits
/// what remains.
pub fn select_refresh_output(
    leftover: &Amount,
    fee_refresh: &Amount,
    denoms: &[WithdrawableDenom],
) -> Result<Option<DenomSelection>, SelectionError> {
    let diff = leftover.saturating_sub(fee_refresh)?;
    if diff.saturated || diff.amount.is_zero() {
        return Ok(None);
    }
    let sel = select_withdrawal_denoms(&diff.amount, denoms)?;
    Ok(if sel.is_empty() { None } else { Some(sel) })
}

/// Face value a refresh of `leftover` would yield; zero when not worth it.
pub fn estimate_refresh_output(
    leftover: &Amount,
    fee_refresh: &Amount,
    denoms: &[WithdrawableDenom],
) -> Result<Amount, SelectionError> {
    match select_refresh_output(leftover, fee_refresh, denoms)? {
        Some(sel) => Ok(sel.total_coin_value),
        None => Ok(Amount::zero(leftover.currency())?),
    }
}
