//! Withdrawal groups: planchets, blind signatures and coins.
//!
//! `Pending → PlanchetsCreated → BlindedSigSent → UnblindedAndStored → Done`.
//! Planchets derive from the group's secret seed, so a retried request sends
//! the same blinded planchet and the exchange returns its stored signature.

use taler_network::wire::{WithdrawRequest, WithdrawResponse};
use taler_store::records::{
    CoinRecord, CoinSource, CoinStatus, DenominationRecord, PlanchetRecord, ReserveRecord,
    ReserveStatus, WithdrawalGroupRecord, WithdrawalStatus,
};
use taler_store::{record, run_read, run_write, StoreName};
use taler_types::Timestamp;
use tracing::{debug, info};

use crate::crypto_worker::{PlanchetRequest, UnblindRequest};
use crate::exchange_api;
use crate::exchanges::get_denomination;
use crate::notifications::Notification;
use crate::operations::expand_selection;
use crate::state::InternalWalletState;
use crate::WalletError;

pub fn get_withdrawal_group(
    state: &InternalWalletState,
    withdrawal_group_id: &str,
) -> Result<WithdrawalGroupRecord, WalletError> {
    run_read(state.db(), &[StoreName::WithdrawalGroups], |tx| {
        record::get::<WithdrawalGroupRecord, _>(tx, withdrawal_group_id.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("withdrawal group {withdrawal_group_id}")))
    })
}

fn set_status(
    state: &InternalWalletState,
    withdrawal_group_id: &str,
    from: WithdrawalStatus,
    to: WithdrawalStatus,
) -> Result<(), WalletError> {
    run_write(state.db(), &[StoreName::WithdrawalGroups], |tx| {
        let mut group = record::get_required::<WithdrawalGroupRecord, _>(
            &*tx,
            withdrawal_group_id.as_bytes(),
        )?;
        if group.status == from {
            group.status = to;
            record::put(tx, &group)?;
        }
        Ok::<_, WalletError>(())
    })?;
    info!(withdrawal_group_id, ?from, ?to, "withdrawal status changed");
    Ok(())
}

fn check_withdrawable(denom: &DenominationRecord, now: Timestamp) -> Result<(), WalletError> {
    if denom.is_withdrawable(now) {
        Ok(())
    } else {
        Err(WalletError::DenominationExpired(denom.denom_pub_hash))
    }
}

/// Advance a withdrawal group until it is done or a step fails.
pub async fn process_withdrawal_group(
    state: &InternalWalletState,
    withdrawal_group_id: &str,
) -> Result<(), WalletError> {
    loop {
        let group = get_withdrawal_group(state, withdrawal_group_id)?;
        debug!(withdrawal_group_id, status = ?group.status, "processing withdrawal group");
        match group.status {
            WithdrawalStatus::Pending => create_planchets(state, &group).await?,
            WithdrawalStatus::PlanchetsCreated => {
                check_planchet_denominations(state, &group)?;
                set_status(
                    state,
                    withdrawal_group_id,
                    WithdrawalStatus::PlanchetsCreated,
                    WithdrawalStatus::BlindedSigSent,
                )?;
            }
            WithdrawalStatus::BlindedSigSent => withdraw_coins(state, &group).await?,
            WithdrawalStatus::UnblindedAndStored => finish(state, &group)?,
            WithdrawalStatus::Done | WithdrawalStatus::Failed | WithdrawalStatus::Cancelled => {
                return Ok(())
            }
        }
    }
}

async fn create_planchets(
    state: &InternalWalletState,
    group: &WithdrawalGroupRecord,
) -> Result<(), WalletError> {
    let now = state.clock.now();
    let stores = [StoreName::Reserves, StoreName::Denominations];
    let (reserve, denoms) = run_read(state.db(), &stores, |tx| {
        let reserve = record::get::<ReserveRecord, _>(tx, group.reserve_pub.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("reserve {}", group.reserve_pub)))?;
        let denoms = expand_selection(tx, &group.exchange_base_url, &group.denoms_sel)?;
        Ok::<_, WalletError>((reserve, denoms))
    })?;

    let mut planchets = Vec::with_capacity(denoms.len());
    for (coin_index, denom) in denoms.iter().enumerate() {
        check_withdrawable(denom, now)?;
        let p = state
            .crypto()
            .create_planchet(PlanchetRequest {
                secret_seed: group.secret_seed.clone(),
                coin_index: coin_index as u32,
                denom_pub: denom.denom_pub,
                value: denom.value.clone(),
                fee_withdraw: denom.fee_withdraw.clone(),
                reserve_pub: reserve.reserve_pub,
                reserve_priv: reserve.reserve_priv.clone(),
            })
            .await?;
        planchets.push(PlanchetRecord {
            withdrawal_group_id: group.withdrawal_group_id.clone(),
            coin_index: coin_index as u32,
            coin_pub: p.coin_pub,
            coin_priv: p.coin_priv,
            blinding_secret: p.blinding_secret,
            denom_pub_hash: p.denom_pub_hash,
            blinded: p.blinded,
            coin_ev_hash: p.coin_ev_hash,
            amount_with_fee: p.amount_with_fee,
            reserve_sig: p.reserve_sig,
            withdrawal_done: false,
            last_error: None,
        });
    }

    let id = group.withdrawal_group_id.as_str();
    run_write(
        state.db(),
        &[StoreName::WithdrawalGroups, StoreName::Planchets],
        |tx| {
            let mut group = record::get_required::<WithdrawalGroupRecord, _>(&*tx, id.as_bytes())?;
            if group.status != WithdrawalStatus::Pending {
                return Ok(());
            }
            for p in &planchets {
                if record::get::<PlanchetRecord, _>(&*tx, &PlanchetRecord::key_for(id, p.coin_index))?
                    .is_none()
                {
                    record::put(tx, p)?;
                }
            }
            group.status = WithdrawalStatus::PlanchetsCreated;
            record::put(tx, &group)?;
            Ok::<_, WalletError>(())
        },
    )?;
    info!(withdrawal_group_id = id, planchets = planchets.len(), "planchets created");
    Ok(())
}

fn load_planchets(
    state: &InternalWalletState,
    withdrawal_group_id: &str,
) -> Result<Vec<PlanchetRecord>, WalletError> {
    run_read(state.db(), &[StoreName::Planchets], |tx| {
        record::iter_prefix(tx, &PlanchetRecord::group_prefix(withdrawal_group_id))
            .map_err(WalletError::from)
    })
}

fn check_planchet_denominations(
    state: &InternalWalletState,
    group: &WithdrawalGroupRecord,
) -> Result<(), WalletError> {
    let now = state.clock.now();
    let planchets = load_planchets(state, &group.withdrawal_group_id)?;
    run_read(state.db(), &[StoreName::Denominations], |tx| {
        for p in planchets.iter().filter(|p| !p.withdrawal_done) {
            let denom = get_denomination(tx, &group.exchange_base_url, &p.denom_pub_hash)?;
            check_withdrawable(&denom, now)?;
        }
        Ok(())
    })
}

async fn withdraw_coins(
    state: &InternalWalletState,
    group: &WithdrawalGroupRecord,
) -> Result<(), WalletError> {
    let id = group.withdrawal_group_id.as_str();
    let url = exchange_api::join(
        &group.exchange_base_url,
        &format!("reserves/{}/withdraw", group.reserve_pub.to_crock()),
    )?;
    let planchets = load_planchets(state, id)?;
    for p in planchets.into_iter().filter(|p| !p.withdrawal_done) {
        let denom = run_read(state.db(), &[StoreName::Denominations], |tx| {
            get_denomination(tx, &group.exchange_base_url, &p.denom_pub_hash)
        })?;
        check_withdrawable(&denom, state.clock.now())?;
        debug!(withdrawal_group_id = id, coin_index = p.coin_index, "requesting blind signature");
        let body = WithdrawRequest {
            denom_pub_hash: p.denom_pub_hash,
            coin_ev: p.blinded,
            reserve_sig: p.reserve_sig,
        };
        let resp: WithdrawResponse =
            exchange_api::post_json(state.http.as_ref(), &url, &body).await?;
        let denom_sig = state
            .crypto()
            .unblind_and_verify(UnblindRequest {
                blinded: p.blinded,
                ev_sig: resp.ev_sig,
                blinding_secret: p.blinding_secret.clone(),
                denom_pub: denom.denom_pub,
            })
            .await?;

        let coin = CoinRecord {
            coin_pub: p.coin_pub,
            coin_priv: p.coin_priv.clone(),
            exchange_base_url: group.exchange_base_url.clone(),
            denom_pub_hash: p.denom_pub_hash,
            denom_sig,
            blinding_secret: p.blinding_secret.clone(),
            value: denom.value.clone(),
            status: CoinStatus::Fresh,
            source: CoinSource::Withdraw {
                withdrawal_group_id: id.to_string(),
                coin_index: p.coin_index,
                reserve_pub: group.reserve_pub,
            },
            spent_by: None,
            created_at: state.clock.now(),
        };
        run_write(state.db(), &[StoreName::Planchets, StoreName::Coins], |tx| {
            let key = PlanchetRecord::key_for(id, p.coin_index);
            let mut stored = record::get_required::<PlanchetRecord, _>(&*tx, &key)?;
            if stored.withdrawal_done {
                return Ok(());
            }
            stored.withdrawal_done = true;
            stored.last_error = None;
            record::put(tx, &stored)?;
            record::put(tx, &coin)?;
            Ok::<_, WalletError>(())
        })?;
        debug!(withdrawal_group_id = id, coin_pub = %p.coin_pub, "coin stored");
    }
    set_status(
        state,
        id,
        WithdrawalStatus::BlindedSigSent,
        WithdrawalStatus::UnblindedAndStored,
    )
}

fn finish(state: &InternalWalletState, group: &WithdrawalGroupRecord) -> Result<(), WalletError> {
    let now = state.clock.now();
    let id = group.withdrawal_group_id.as_str();
    run_write(
        state.db(),
        &[StoreName::WithdrawalGroups, StoreName::Reserves],
        |tx| {
            let mut group = record::get_required::<WithdrawalGroupRecord, _>(&*tx, id.as_bytes())?;
            if group.status != WithdrawalStatus::UnblindedAndStored {
                return Ok(());
            }
            group.status = WithdrawalStatus::Done;
            group.finished_at = Some(now);
            group.last_error = None;
            record::put(tx, &group)?;
            if let Some(mut reserve) =
                record::get::<ReserveRecord, _>(&*tx, group.reserve_pub.as_bytes())?
            {
                if reserve.status == ReserveStatus::Withdrawing {
                    reserve.status = ReserveStatus::Dormant;
                    record::put(tx, &reserve)?;
                }
            }
            Ok::<_, WalletError>(())
        },
    )?;
    info!(
        withdrawal_group_id = id,
        amount = %group.effective_amount,
        "withdrawal finished"
    );
    state.notify(Notification::WithdrawalGroupFinished {
        withdrawal_group_id: id.to_string(),
    });
    state.notify(Notification::BalanceChanged);
    Ok(())
}

/// Stop a withdrawal group that has not finished yet.
pub fn abort_withdrawal(
    state: &InternalWalletState,
    withdrawal_group_id: &str,
) -> Result<(), WalletError> {
    run_write(
        state.db(),
        &[StoreName::WithdrawalGroups, StoreName::Reserves],
        |tx| {
            let mut group =
                record::get::<WithdrawalGroupRecord, _>(&*tx, withdrawal_group_id.as_bytes())?
                    .ok_or_else(|| {
                        WalletError::NotFound(format!("withdrawal group {withdrawal_group_id}"))
                    })?;
            if group.status.is_final() {
                return Err(WalletError::InvalidRequest(format!(
                    "withdrawal group {withdrawal_group_id} already finished"
                )));
            }
            group.status = WithdrawalStatus::Cancelled;
            record::put(tx, &group)?;
            if let Some(mut reserve) =
                record::get::<ReserveRecord, _>(&*tx, group.reserve_pub.as_bytes())?
            {
                if reserve.status == ReserveStatus::Withdrawing {
                    reserve.status = ReserveStatus::Dormant;
                    record::put(tx, &reserve)?;
                }
            }
            Ok(())
        },
    )?;
    info!(withdrawal_group_id, "withdrawal cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEnv;
    use taler_nullables::{DenomSpec, FakeExchangeConfig};
    use taler_types::Amount;

    fn kudos(v: &str) -> Amount {
        Amount::parse(&format!("KUDOS:{v}")).unwrap()
    }

    #[tokio::test]
    async fn withdraws_greedy_selection() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["8", "2", "1"]).unwrap());
        let group_id = env.withdraw("KUDOS:11").await;
        let group = get_withdrawal_group(&env.state, &group_id).unwrap();
        assert_eq!(group.status, WithdrawalStatus::Done);
        assert_eq!(group.effective_amount, kudos("11"));
        let mut values: Vec<String> = env.coins().iter().map(|c| c.value.to_string()).collect();
        values.sort();
        assert_eq!(values, vec!["KUDOS:1", "KUDOS:2", "KUDOS:8"]);
        assert_eq!(env.exchange.withdrawal_count(), 3);
    }

    #[tokio::test]
    async fn rerun_from_planchets_created_reuses_planchets() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        let group_id = env.fund_reserve("KUDOS:3").await;

        // Stop right after planchets are stored.
        let group = get_withdrawal_group(&env.state, &group_id).unwrap();
        create_planchets(&env.state, &group).await.unwrap();
        let first = load_planchets(&env.state, &group_id).unwrap();

        // Withdraw once, then pretend the results were lost and go again.
        set_status(
            &env.state,
            &group_id,
            WithdrawalStatus::PlanchetsCreated,
            WithdrawalStatus::BlindedSigSent,
        )
        .unwrap();
        let group = get_withdrawal_group(&env.state, &group_id).unwrap();
        withdraw_coins(&env.state, &group).await.unwrap();
        run_write(
            env.state.db(),
            &[StoreName::WithdrawalGroups, StoreName::Planchets, StoreName::Coins],
            |tx| {
                let mut g = record::get_required::<WithdrawalGroupRecord, _>(&*tx, group_id.as_bytes())?;
                g.status = WithdrawalStatus::PlanchetsCreated;
                record::put(tx, &g)?;
                for mut p in first.clone() {
                    record::delete::<CoinRecord, _>(tx, p.coin_pub.as_bytes())?;
                    p.withdrawal_done = false;
                    record::put(tx, &p)?;
                }
                Ok::<_, WalletError>(())
            },
        )
        .unwrap();

        process_withdrawal_group(&env.state, &group_id).await.unwrap();
        let second = load_planchets(&env.state, &group_id).unwrap();
        let pubs = |ps: &[PlanchetRecord]| ps.iter().map(|p| p.coin_pub).collect::<Vec<_>>();
        assert_eq!(pubs(&first), pubs(&second));
        assert_eq!(env.exchange.withdrawal_count(), 3);
        let reserve_pub = get_withdrawal_group(&env.state, &group_id).unwrap().reserve_pub;
        assert_eq!(env.exchange.reserve_balance(&reserve_pub), Some(kudos("0")));
        assert_eq!(env.coins().len(), 3);
    }

    #[tokio::test]
    async fn expired_denomination_fails_the_group() {
        let spec = DenomSpec::new(kudos("1")).unwrap().with_withdraw_secs(100);
        let mut config = FakeExchangeConfig::with_values("KUDOS", &[]).unwrap();
        config.denominations.push(spec);
        let env = FakeEnv::new(config);
        let group_id = env.fund_reserve("KUDOS:2").await;
        env.clock.advance(200);
        let err = process_withdrawal_group(&env.state, &group_id).await.unwrap_err();
        assert!(matches!(err, WalletError::DenominationExpired(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn offline_exchange_is_transient_and_resumable() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        let group_id = env.fund_reserve("KUDOS:2").await;
        env.exchange.set_offline(true);
        let err = process_withdrawal_group(&env.state, &group_id).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            get_withdrawal_group(&env.state, &group_id).unwrap().status,
            WithdrawalStatus::BlindedSigSent
        );
        env.exchange.set_offline(false);
        process_withdrawal_group(&env.state, &group_id).await.unwrap();
        assert_eq!(env.coins().len(), 2);
    }
}
