//! Per-currency balances computed from committed store state.

use std::collections::BTreeMap;

use serde::Serialize;
use taler_store::records::{
    CoinRecord, CoinSource, DepositGroupRecord, RefreshGroupRecord, RefreshGroupStatus,
    ReserveRecord, ReserveStatus, WithdrawalGroupRecord,
};
use taler_store::{record, run_read, ReadTxn, StoreName};
use taler_types::Amount;

use crate::state::InternalWalletState;
use crate::WalletError;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Balance {
    pub currency: String,
    /// Fresh coins not reserved by any operation.
    pub available: Amount,
    /// Value still expected from withdrawals, refreshes and funded reserves.
    pub pending_incoming: Amount,
    /// Value allocated to deposits that are not confirmed yet.
    pub pending_outgoing: Amount,
}

#[derive(Default)]
struct Balances(BTreeMap<String, Balance>);

enum Column {
    Available,
    Incoming,
    Outgoing,
}

impl Balances {
    fn add(&mut self, column: Column, amount: &Amount) -> Result<(), WalletError> {
        let currency = amount.currency().to_string();
        if !self.0.contains_key(&currency) {
            let zero = Amount::zero(&currency)?;
            self.0.insert(
                currency.clone(),
                Balance {
                    currency: currency.clone(),
                    available: zero.clone(),
                    pending_incoming: zero.clone(),
                    pending_outgoing: zero,
                },
            );
        }
        let Some(b) = self.0.get_mut(&currency) else {
            return Ok(());
        };
        let slot = match column {
            Column::Available => &mut b.available,
            Column::Incoming => &mut b.pending_incoming,
            Column::Outgoing => &mut b.pending_outgoing,
        };
        *slot = slot.checked_add(amount)?;
        Ok(())
    }
}

fn value_of<'a>(
    coins: impl Iterator<Item = &'a CoinRecord>,
    currency: &str,
) -> Result<Amount, WalletError> {
    let mut total = Amount::zero(currency)?;
    for c in coins {
        total = total.checked_add(&c.value)?;
    }
    Ok(total)
}

pub fn compute_balances<T: ReadTxn + ?Sized>(tx: &T) -> Result<Vec<Balance>, WalletError> {
    let coins = record::iter::<CoinRecord, _>(tx)?;
    let mut balances = Balances::default();

    for coin in coins.iter().filter(|c| c.is_fresh() && c.spent_by.is_none()) {
        balances.add(Column::Available, &coin.value)?;
    }

    for g in record::iter::<WithdrawalGroupRecord, _>(tx)? {
        if g.status.is_final() {
            continue;
        }
        let stored = value_of(
            coins.iter().filter(|c| {
                matches!(&c.source, CoinSource::Withdraw { withdrawal_group_id, .. }
                    if *withdrawal_group_id == g.withdrawal_group_id)
            }),
            g.effective_amount.currency(),
        )?;
        balances.add(Column::Incoming, &g.effective_amount.saturating_sub(&stored)?.amount)?;
    }

    for g in record::iter::<RefreshGroupRecord, _>(tx)? {
        if g.status != RefreshGroupStatus::Pending {
            continue;
        }
        let revealed = value_of(
            coins.iter().filter(|c| {
                matches!(&c.source, CoinSource::Refresh { refresh_group_id, .. }
                    if *refresh_group_id == g.refresh_group_id)
            }),
            &g.currency,
        )?;
        balances.add(Column::Incoming, &g.estimated_output.saturating_sub(&revealed)?.amount)?;
    }

    for r in record::iter::<ReserveRecord, _>(tx)? {
        if r.status == ReserveStatus::WaitingForFunds && r.withdrawal_group_ids.is_empty() {
            balances.add(Column::Incoming, &r.instructed_amount)?;
        }
    }

    for g in record::iter::<DepositGroupRecord, _>(tx)? {
        if g.status.is_final() {
            continue;
        }
        for dc in g.coins.iter().filter(|c| !c.deposited) {
            balances.add(Column::Outgoing, &dc.contribution)?;
        }
    }

    Ok(balances.0.into_values().collect())
}

pub fn get_balances(state: &InternalWalletState) -> Result<Vec<Balance>, WalletError> {
    let stores = [
        StoreName::Coins,
        StoreName::WithdrawalGroups,
        StoreName::RefreshGroups,
        StoreName::Reserves,
        StoreName::DepositGroups,
    ];
    run_read(state.db(), &stores, |tx| compute_balances(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::deposit::create_deposit_group;
    use crate::operations::withdraw::process_withdrawal_group;
    use crate::test_support::FakeEnv;
    use taler_nullables::FakeExchangeConfig;

    fn kudos(v: &str) -> Amount {
        Amount::parse(&format!("KUDOS:{v}")).unwrap()
    }

    #[tokio::test]
    async fn empty_wallet_has_no_balances() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        assert!(get_balances(&env.state).unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_withdrawal_counts_as_incoming() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["2", "1"]).unwrap());
        let group_id = env.fund_reserve("KUDOS:3").await;
        let b = get_balances(&env.state).unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].available, kudos("0"));
        assert_eq!(b[0].pending_incoming, kudos("3"));

        process_withdrawal_group(&env.state, &group_id).await.unwrap();
        let b = get_balances(&env.state).unwrap();
        assert_eq!(b[0].available, kudos("3"));
        assert_eq!(b[0].pending_incoming, kudos("0"));
    }

    #[tokio::test]
    async fn allocated_coins_are_outgoing() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["2", "1"]).unwrap());
        env.withdraw("KUDOS:3").await;
        create_deposit_group(&env.state, kudos("2"), "payto://x-taler-bank/bank.test/me")
            .await
            .unwrap();
        let b = get_balances(&env.state).unwrap();
        assert_eq!(b[0].available, kudos("1"));
        assert_eq!(b[0].pending_outgoing, kudos("2"));
    }
}
