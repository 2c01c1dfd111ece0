//! Recoup of coins whose denomination the exchange revoked.
//!
//! Withdrawn coins are credited back to their reserve, which is then
//! withdrawn again. Refreshed coins are credited to the coin they were
//! melted from, and that coin is refreshed again.

use taler_network::wire::{RecoupRequest, RecoupResponse};
use taler_store::records::{
    CoinSource, CoinStatus, RecoupGroupRecord, RecoupGroupStatus, RecoupStatus, RefreshReason,
    ReserveRecord, ReserveStatus,
};
use taler_store::{record, run_read, run_write, StoreError, StoreName};
use tracing::{debug, info};

use crate::crypto_worker::RecoupSignRequest;
use crate::exchange_api;
use crate::notifications::Notification;
use crate::operations::get_coin;
use crate::operations::refresh::create_refresh_group;
use crate::state::InternalWalletState;
use crate::WalletError;

pub fn get_recoup_group(
    state: &InternalWalletState,
    recoup_group_id: &str,
) -> Result<RecoupGroupRecord, WalletError> {
    run_read(state.db(), &[StoreName::RecoupGroups], |tx| {
        record::get::<RecoupGroupRecord, _>(tx, recoup_group_id.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("recoup group {recoup_group_id}")))
    })
}

fn set_coin_status(
    state: &InternalWalletState,
    recoup_group_id: &str,
    index: usize,
    status: RecoupStatus,
) -> Result<(), WalletError> {
    run_write(state.db(), &[StoreName::RecoupGroups], |tx| {
        let mut group =
            record::get_required::<RecoupGroupRecord, _>(&*tx, recoup_group_id.as_bytes())?;
        if let Some(c) = group.coins.get_mut(index) {
            c.status = status;
        }
        record::put(tx, &group)?;
        Ok::<_, WalletError>(())
    })
}

pub async fn process_recoup_group(
    state: &InternalWalletState,
    recoup_group_id: &str,
) -> Result<(), WalletError> {
    let group = get_recoup_group(state, recoup_group_id)?;
    if group.status != RecoupGroupStatus::Pending {
        return Ok(());
    }
    debug!(recoup_group_id, coins = group.coins.len(), "processing recoup group");

    for (index, rc) in group.coins.iter().enumerate() {
        if rc.status == RecoupStatus::Refunded {
            continue;
        }
        if rc.status == RecoupStatus::Pending {
            set_coin_status(state, recoup_group_id, index, RecoupStatus::RecoupRequested)?;
        }
        recoup_coin(state, &group, index).await?;
    }

    let now = state.clock.now();
    let finished = run_write(state.db(), &[StoreName::RecoupGroups], |tx| {
        let mut group =
            record::get_required::<RecoupGroupRecord, _>(&*tx, recoup_group_id.as_bytes())?;
        if group.status != RecoupGroupStatus::Pending
            || group.coins.iter().any(|c| c.status != RecoupStatus::Refunded)
        {
            return Ok(false);
        }
        group.status = RecoupGroupStatus::Done;
        group.finished_at = Some(now);
        group.last_error = None;
        record::put(tx, &group)?;
        Ok::<_, WalletError>(true)
    })?;
    if finished {
        info!(recoup_group_id, "recoup group finished");
        state.notify(Notification::RecoupFinished {
            recoup_group_id: recoup_group_id.to_string(),
        });
        state.notify(Notification::BalanceChanged);
    }
    Ok(())
}

async fn recoup_coin(
    state: &InternalWalletState,
    group: &RecoupGroupRecord,
    index: usize,
) -> Result<(), WalletError> {
    let id = group.recoup_group_id.as_str();
    let entry = group
        .coins
        .get(index)
        .ok_or_else(|| StoreError::Corruption(format!("recoup coin {index} missing")))?;
    let coin = run_read(state.db(), &[StoreName::Coins], |tx| get_coin(tx, &entry.coin_pub))?;
    let coin_sig = state
        .crypto()
        .sign_recoup(RecoupSignRequest {
            coin_priv: coin.coin_priv.clone(),
            denom_pub_hash: coin.denom_pub_hash,
            blinding_secret: coin.blinding_secret.clone(),
        })
        .await?;
    let refreshed = matches!(coin.source, CoinSource::Refresh { .. });
    let body = RecoupRequest {
        denom_pub_hash: coin.denom_pub_hash,
        denom_sig: coin.denom_sig,
        coin_blind_key_secret: coin.blinding_secret.clone(),
        coin_sig,
        refreshed,
    };
    let url = exchange_api::join(
        &coin.exchange_base_url,
        &format!("coins/{}/recoup", coin.coin_pub.to_crock()),
    )?;
    debug!(recoup_group_id = id, coin_pub = %coin.coin_pub, refreshed, "sending recoup");
    let resp: RecoupResponse = exchange_api::post_json(state.http.as_ref(), &url, &body).await?;

    let now = state.clock.now();
    let stores = [
        StoreName::RecoupGroups,
        StoreName::Coins,
        StoreName::Reserves,
        StoreName::Denominations,
        StoreName::RefreshGroups,
    ];
    let coin_pub = coin.coin_pub;
    run_write(state.db(), &stores, |tx| {
        let mut group = record::get_required::<RecoupGroupRecord, _>(&*tx, id.as_bytes())?;
        let Some(entry) = group.coins.get_mut(index) else {
            return Ok(());
        };
        if entry.status == RecoupStatus::Refunded {
            return Ok(());
        }
        entry.status = RecoupStatus::Refunded;
        record::put(tx, &group)?;

        let mut coin = get_coin(&*tx, &coin_pub)?;
        coin.status = CoinStatus::Dormant;
        record::put(tx, &coin)?;

        match &coin.source {
            CoinSource::Withdraw { reserve_pub, .. } => {
                let credited = resp.reserve_pub.unwrap_or(*reserve_pub);
                if let Some(mut reserve) =
                    record::get::<ReserveRecord, _>(&*tx, credited.as_bytes())?
                {
                    reserve.status = ReserveStatus::WaitingForFunds;
                    reserve.last_error = None;
                    record::put(tx, &reserve)?;
                    info!(reserve_pub = %credited, "reserve credited by recoup");
                }
            }
            CoinSource::Refresh { old_coin_pub, .. } => {
                let old = resp.old_coin_pub.unwrap_or(*old_coin_pub);
                create_refresh_group(tx, RefreshReason::Recoup, &[(old, coin.value.clone())], now)?;
            }
        }
        Ok::<_, WalletError>(())
    })?;
    info!(recoup_group_id = id, coin_pub = %coin_pub, "coin recouped");
    state.wake();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::update_exchange;
    use crate::operations::reserves::process_reserve;
    use crate::test_support::FakeEnv;
    use taler_nullables::FakeExchangeConfig;
    use taler_store::records::WithdrawalGroupRecord;
    use taler_types::Amount;

    #[tokio::test]
    async fn withdrawn_coin_is_credited_back_to_reserve() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["2", "1"]).unwrap());
        env.withdraw("KUDOS:3").await;
        let (_, two) = env
            .exchange
            .denominations()
            .into_iter()
            .find(|(v, _)| *v == Amount::parse("KUDOS:2").unwrap())
            .unwrap();
        env.exchange.revoke_denomination(&two);
        update_exchange(&env.state, "https://exchange.test/").await.unwrap();

        let groups: Vec<RecoupGroupRecord> = run_read(env.state.db(), &[StoreName::RecoupGroups], |tx| {
            record::iter(tx)
        })
        .unwrap();
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        process_recoup_group(&env.state, &group.recoup_group_id).await.unwrap();

        let done = get_recoup_group(&env.state, &group.recoup_group_id).unwrap();
        assert_eq!(done.status, RecoupGroupStatus::Done);
        let recouped = env
            .coins()
            .into_iter()
            .find(|c| c.coin_pub == done.coins[0].coin_pub)
            .unwrap();
        assert_eq!(recouped.status, CoinStatus::Dormant);

        let CoinSource::Withdraw { reserve_pub, .. } = recouped.source else {
            panic!("expected a withdrawn coin");
        };
        assert_eq!(
            env.exchange.reserve_balance(&reserve_pub),
            Some(Amount::parse("KUDOS:2").unwrap())
        );
        process_reserve(&env.state, &reserve_pub).await.unwrap();
        let groups: Vec<WithdrawalGroupRecord> =
            run_read(env.state.db(), &[StoreName::WithdrawalGroups], |tx| record::iter(tx)).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn repeated_recoup_is_harmless() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        env.withdraw("KUDOS:1").await;
        let (_, one) = env.exchange.denominations().remove(0);
        env.exchange.revoke_denomination(&one);
        update_exchange(&env.state, "https://exchange.test/").await.unwrap();
        let group: RecoupGroupRecord = run_read(env.state.db(), &[StoreName::RecoupGroups], |tx| {
            record::iter(tx)
        })
        .unwrap()
        .remove(0);

        env.exchange.inject_error("/recoup", 503);
        assert!(process_recoup_group(&env.state, &group.recoup_group_id)
            .await
            .unwrap_err()
            .is_transient());
        assert_eq!(
            get_recoup_group(&env.state, &group.recoup_group_id).unwrap().coins[0].status,
            RecoupStatus::RecoupRequested
        );
        process_recoup_group(&env.state, &group.recoup_group_id).await.unwrap();
        process_recoup_group(&env.state, &group.recoup_group_id).await.unwrap();
        assert_eq!(env.exchange.request_count("recoup"), 2);
    }
}
