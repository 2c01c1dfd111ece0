//! Refresh groups: melting coins into fresh change.
//!
//! Every coin of a group has its own session:
//! `Pending → MeltSent → MeltConfirmed → NewPlanchetsRevealed`.
//! Once the exchange confirmed a melt the coin's value lives only in the
//! revealed coins, so a session in `MeltConfirmed` is retried until the
//! reveal succeeds and the group can no longer be cancelled.

use taler_crypto::{random_id, random_seed};
use taler_network::wire::{MeltRequest, MeltResponse, RevealRequest, RevealResponse};
use taler_selection::{estimate_refresh_output, select_refresh_output};
use taler_store::records::{
    CoinRecord, CoinSource, CoinStatus, DenominationRecord, ExchangeDetailsRecord, RefreshCoin,
    RefreshGroupRecord, RefreshGroupStatus, RefreshReason, RefreshSession, RefreshSessionStatus,
};
use taler_store::{record, run_read, run_write, ReadTxn, StoreError, StoreName, WriteTxn};
use taler_types::{Amount, EddsaPublicKey, ErrorDetail, SecretSeed, Timestamp};
use tracing::{debug, error, info, warn};

use crate::crypto_worker::{MeltConfirmationCheck, RefreshSessionRequest, RefreshSessionResult, UnblindRequest};
use crate::exchange_api;
use crate::exchanges::{find_denomination, get_denomination, get_details, selectable_denominations};
use crate::notifications::Notification;
use crate::operations::{expand_selection, get_coin, is_double_spend, mark_forbidden};
use crate::state::InternalWalletState;
use crate::WalletError;

pub fn refresh_tag(refresh_group_id: &str) -> String {
    format!("refresh:{refresh_group_id}")
}

/// Create a refresh group melting `amount` from each listed coin.
///
/// Fresh coins are reserved for the group. The caller's transaction must
/// include the `Coins`, `Denominations` and `RefreshGroups` stores.
pub(crate) fn create_refresh_group<T: WriteTxn + ?Sized>(
    tx: &mut T,
    reason: RefreshReason,
    inputs: &[(EddsaPublicKey, Amount)],
    now: Timestamp,
) -> Result<Option<String>, WalletError> {
    let Some((_, first)) = inputs.first() else {
        return Ok(None);
    };
    let currency = first.currency().to_string();
    let refresh_group_id = random_id();
    let tag = refresh_tag(&refresh_group_id);

    let mut estimated_output = Amount::zero(&currency)?;
    let mut coins = Vec::with_capacity(inputs.len());
    for (coin_pub, amount_melt) in inputs {
        let mut coin = get_coin(&*tx, coin_pub)?;
        let Some(denom) = find_denomination(&*tx, &coin.exchange_base_url, &coin.denom_pub_hash)? else {
            warn!(coin_pub = %coin_pub, "denomination purged, coin left out of refresh");
            continue;
        };
        let withdrawable: Vec<_> = selectable_denominations(&*tx, &coin.exchange_base_url, now)?
            .iter()
            .map(DenominationRecord::to_withdrawable)
            .collect();
        let estimate = estimate_refresh_output(amount_melt, &denom.fee_refresh, &withdrawable)?;
        estimated_output = estimated_output.checked_add(&estimate)?;
        if coin.spent_by.is_none() {
            coin.spent_by = Some(tag.clone());
            record::put(tx, &coin)?;
        }
        coins.push(RefreshCoin {
            coin_pub: *coin_pub,
            amount_melt: amount_melt.clone(),
            status: RefreshSessionStatus::Pending,
            session: None,
            last_error: None,
        });
    }
    if coins.is_empty() {
        return Ok(None);
    }
    let coin_count = coins.len();

    record::insert(
        tx,
        &RefreshGroupRecord {
            refresh_group_id: refresh_group_id.clone(),
            reason,
            currency,
            coins,
            estimated_output: estimated_output.clone(),
            status: RefreshGroupStatus::Pending,
            created_at: now,
            finished_at: None,
            last_error: None,
        },
    )?;
    info!(
        refresh_group_id = %refresh_group_id,
        ?reason,
        coins = coin_count,
        estimated_output = %estimated_output,
        "refresh group created"
    );
    Ok(Some(refresh_group_id))
}

/// Refresh the given fresh coins in full.
pub fn force_refresh(
    state: &InternalWalletState,
    coin_pubs: &[EddsaPublicKey],
) -> Result<String, WalletError> {
    if coin_pubs.is_empty() {
        return Err(WalletError::InvalidRequest("no coins to refresh".into()));
    }
    let now = state.clock.now();
    let stores = [
        StoreName::Coins,
        StoreName::Denominations,
        StoreName::RefreshGroups,
    ];
    let id = run_write(state.db(), &stores, |tx| {
        let mut inputs = Vec::with_capacity(coin_pubs.len());
        for coin_pub in coin_pubs {
            let coin = get_coin(&*tx, coin_pub)?;
            if !coin.is_fresh() || coin.spent_by.is_some() {
                return Err(WalletError::InvalidRequest(format!(
                    "coin {coin_pub} is not available for refresh"
                )));
            }
            inputs.push((coin.coin_pub, coin.value));
        }
        create_refresh_group(tx, RefreshReason::Manual, &inputs, now)?
            .ok_or_else(|| WalletError::InvalidRequest("no coins to refresh".into()))
    })?;
    state.wake();
    Ok(id)
}

pub fn get_refresh_group(
    state: &InternalWalletState,
    refresh_group_id: &str,
) -> Result<RefreshGroupRecord, WalletError> {
    run_read(state.db(), &[StoreName::RefreshGroups], |tx| {
        record::get::<RefreshGroupRecord, _>(tx, refresh_group_id.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("refresh group {refresh_group_id}")))
    })
}

/// Load, change and store one session of a group in a single transaction.
fn update_session<F>(
    state: &InternalWalletState,
    refresh_group_id: &str,
    index: usize,
    extra: &[StoreName],
    f: F,
) -> Result<(), WalletError>
where
    F: FnOnce(&mut dyn WriteTxn, &mut RefreshCoin) -> Result<(), WalletError>,
{
    let mut stores = vec![StoreName::RefreshGroups];
    stores.extend_from_slice(extra);
    run_write(state.db(), &stores, |tx| {
        let mut group =
            record::get_required::<RefreshGroupRecord, _>(&*tx, refresh_group_id.as_bytes())?;
        let session = group
            .coins
            .get_mut(index)
            .ok_or_else(|| StoreError::Corruption(format!("refresh session {index} missing")))?;
        f(tx, session)?;
        record::put(tx, &group)?;
        Ok(())
    })
}

/// Advance every session of a refresh group, then close the group once all
/// sessions are final.
pub async fn process_refresh_group(
    state: &InternalWalletState,
    refresh_group_id: &str,
) -> Result<(), WalletError> {
    let group = get_refresh_group(state, refresh_group_id)?;
    if group.status != RefreshGroupStatus::Pending {
        return Ok(());
    }
    debug!(refresh_group_id, "processing refresh group");

    for index in 0..group.coins.len() {
        match process_session(state, refresh_group_id, index).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                let current = get_refresh_group(state, refresh_group_id)?;
                let melted = current.coins.get(index).is_some_and(|c| {
                    c.status == RefreshSessionStatus::MeltConfirmed
                });
                if melted {
                    return Err(e);
                }
                warn!(refresh_group_id, index, error = %e, "refresh session failed");
                let detail = e.to_detail();
                update_session(state, refresh_group_id, index, &[], |_, session| {
                    if !session.status.is_final() {
                        session.status = RefreshSessionStatus::Failed;
                        session.last_error = Some(detail);
                    }
                    Ok(())
                })?;
            }
        }
    }
    finish_group(state, refresh_group_id)
}

async fn process_session(
    state: &InternalWalletState,
    refresh_group_id: &str,
    index: usize,
) -> Result<(), WalletError> {
    loop {
        let group = get_refresh_group(state, refresh_group_id)?;
        let session = group
            .coins
            .get(index)
            .cloned()
            .ok_or_else(|| StoreError::Corruption(format!("refresh session {index} missing")))?;
        debug!(refresh_group_id, index, status = ?session.status, "processing refresh session");
        match session.status {
            RefreshSessionStatus::Pending => prepare_session(state, &group, index, &session).await?,
            RefreshSessionStatus::MeltSent => melt(state, refresh_group_id, index, &session).await?,
            RefreshSessionStatus::MeltConfirmed => {
                reveal(state, refresh_group_id, index, &session).await?
            }
            RefreshSessionStatus::NewPlanchetsRevealed
            | RefreshSessionStatus::Skipped
            | RefreshSessionStatus::Failed => return Ok(()),
        }
    }
}

struct SessionInputs {
    coin: CoinRecord,
    fee_refresh: Amount,
    new_denoms: Vec<DenominationRecord>,
}

fn load_inputs<T: ReadTxn + ?Sized>(
    tx: &T,
    session: &RefreshCoin,
    details: &RefreshSession,
) -> Result<SessionInputs, WalletError> {
    let coin = get_coin(tx, &session.coin_pub)?;
    let fee_refresh = get_denomination(tx, &coin.exchange_base_url, &coin.denom_pub_hash)?.fee_refresh;
    let new_denoms = expand_selection(tx, &coin.exchange_base_url, &details.new_denoms)?;
    Ok(SessionInputs {
        coin,
        fee_refresh,
        new_denoms,
    })
}

async fn derive(
    state: &InternalWalletState,
    inputs: &SessionInputs,
    amount_melt: &Amount,
    session_seed: &SecretSeed,
    kappa: u32,
) -> Result<RefreshSessionResult, WalletError> {
    let derived = state
        .crypto()
        .derive_refresh_session(RefreshSessionRequest {
            session_seed: session_seed.clone(),
            kappa,
            old_coin_priv: inputs.coin.coin_priv.clone(),
            amount_with_fee: amount_melt.clone(),
            fee_refresh: inputs.fee_refresh.clone(),
            new_denoms: inputs.new_denoms.iter().map(|d| d.denom_pub).collect(),
        })
        .await?;
    Ok(derived)
}

fn session_details(session: &RefreshCoin) -> Result<&RefreshSession, WalletError> {
    session.session.as_ref().ok_or_else(|| {
        WalletError::Store(StoreError::Corruption(format!(
            "refresh session of coin {} has no key material",
            session.coin_pub
        )))
    })
}

async fn prepare_session(
    state: &InternalWalletState,
    group: &RefreshGroupRecord,
    index: usize,
    session: &RefreshCoin,
) -> Result<(), WalletError> {
    let now = state.clock.now();
    let (coin, fee_refresh, selection) = run_read(
        state.db(),
        &[StoreName::Coins, StoreName::Denominations],
        |tx| {
            let coin = get_coin(tx, &session.coin_pub)?;
            let denom = get_denomination(tx, &coin.exchange_base_url, &coin.denom_pub_hash)?;
            let withdrawable: Vec<_> = selectable_denominations(tx, &coin.exchange_base_url, now)?
                .iter()
                .map(DenominationRecord::to_withdrawable)
                .collect();
            let sel = select_refresh_output(&session.amount_melt, &denom.fee_refresh, &withdrawable)?;
            Ok::<_, WalletError>((coin, denom.fee_refresh, sel))
        },
    )?;
    let id = group.refresh_group_id.as_str();
    let tag = refresh_tag(id);

    let Some(new_denoms) = selection else {
        info!(
            refresh_group_id = id,
            coin_pub = %coin.coin_pub,
            amount = %session.amount_melt,
            "leftover too small to refresh"
        );
        return update_session(state, id, index, &[StoreName::Coins], |tx, s| {
            s.status = RefreshSessionStatus::Skipped;
            let mut coin = get_coin(&*tx, &s.coin_pub)?;
            if coin.is_fresh() && coin.spent_by.as_deref() == Some(tag.as_str()) {
                coin.spent_by = None;
                record::put(tx, &coin)?;
            }
            Ok(())
        });
    };

    let new_coins = run_read(state.db(), &[StoreName::Denominations], |tx| {
        expand_selection(tx, &coin.exchange_base_url, &new_denoms)
    })?;
    let inputs = SessionInputs {
        coin,
        fee_refresh,
        new_denoms: new_coins,
    };
    let session_seed = random_seed();
    let kappa = state.config.refresh_kappa;
    let derived = derive(state, &inputs, &session.amount_melt, &session_seed, kappa).await?;
    let details = RefreshSession {
        session_seed,
        kappa,
        new_denoms,
        rc: derived.rc,
        noreveal_index: None,
    };

    update_session(state, id, index, &[], |_, s| {
        if s.status == RefreshSessionStatus::Pending {
            s.session = Some(details);
            s.status = RefreshSessionStatus::MeltSent;
        }
        Ok(())
    })?;
    info!(
        refresh_group_id = id,
        coin_pub = %session.coin_pub,
        new_coins = inputs.new_denoms.len(),
        "refresh session prepared"
    );
    Ok(())
}

fn is_known_signing_key(details: &ExchangeDetailsRecord, key: &EddsaPublicKey) -> bool {
    details.signing_keys.iter().any(|k| k.key == *key)
}

async fn melt(
    state: &InternalWalletState,
    refresh_group_id: &str,
    index: usize,
    session: &RefreshCoin,
) -> Result<(), WalletError> {
    let details = session_details(session)?;
    let (inputs, exchange) = run_read(
        state.db(),
        &[StoreName::Coins, StoreName::Denominations, StoreName::ExchangeDetails],
        |tx| {
            let inputs = load_inputs(tx, session, details)?;
            let exchange = get_details(tx, &inputs.coin.exchange_base_url)?;
            Ok::<_, WalletError>((inputs, exchange))
        },
    )?;
    let derived = derive(
        state,
        &inputs,
        &session.amount_melt,
        &details.session_seed,
        details.kappa,
    )
    .await?;
    let coin_pub = inputs.coin.coin_pub;

    let url = exchange_api::join(
        &inputs.coin.exchange_base_url,
        &format!("coins/{}/melt", coin_pub.to_crock()),
    )?;
    let body = MeltRequest {
        denom_pub_hash: inputs.coin.denom_pub_hash,
        denom_sig: inputs.coin.denom_sig,
        value_with_fee: session.amount_melt.clone(),
        rc: derived.rc,
        confirm_sig: derived.confirm_sig,
    };
    debug!(refresh_group_id, coin_pub = %coin_pub, "sending melt");
    let resp: MeltResponse = match exchange_api::post_json(state.http.as_ref(), &url, &body).await {
        Ok(r) => r,
        Err(e) if is_double_spend(&e) => {
            run_write(state.db(), &[StoreName::Coins], |tx| mark_forbidden(tx, &coin_pub))?;
            state.notify(Notification::CoinDoubleSpent { coin_pub });
            return Err(WalletError::DoubleSpendDetected { coin_pub });
        }
        Err(e) => return Err(e),
    };

    if resp.noreveal_index >= details.kappa {
        return Err(WalletError::ProtocolError {
            http_status: 200,
            code: 0,
            hint: format!("noreveal index {} out of range", resp.noreveal_index),
        });
    }
    let valid = is_known_signing_key(&exchange, &resp.exchange_pub)
        && state
            .crypto()
            .is_valid_melt_confirmation(MeltConfirmationCheck {
                rc: derived.rc,
                noreveal_index: resp.noreveal_index,
                exchange_pub: resp.exchange_pub,
                sig: resp.exchange_sig,
            })
            .await?;
    if !valid {
        return Err(WalletError::ProtocolError {
            http_status: 200,
            code: 0,
            hint: "invalid melt confirmation signature".into(),
        });
    }

    let tag = refresh_tag(refresh_group_id);
    update_session(state, refresh_group_id, index, &[StoreName::Coins], |tx, s| {
        if s.status != RefreshSessionStatus::MeltSent {
            return Ok(());
        }
        if let Some(details) = s.session.as_mut() {
            details.noreveal_index = Some(resp.noreveal_index);
        }
        s.status = RefreshSessionStatus::MeltConfirmed;
        s.last_error = None;
        let mut coin = get_coin(&*tx, &s.coin_pub)?;
        coin.status = CoinStatus::Dormant;
        if coin.spent_by.is_none() {
            coin.spent_by = Some(tag);
        }
        record::put(tx, &coin)?;
        Ok(())
    })?;
    info!(
        refresh_group_id,
        coin_pub = %coin_pub,
        noreveal_index = resp.noreveal_index,
        "melt confirmed"
    );
    state.notify(Notification::RefreshMelted {
        refresh_group_id: refresh_group_id.to_string(),
        coin_pub,
    });
    Ok(())
}

async fn reveal(
    state: &InternalWalletState,
    refresh_group_id: &str,
    index: usize,
    session: &RefreshCoin,
) -> Result<(), WalletError> {
    let details = session_details(session)?;
    let noreveal = details.noreveal_index.ok_or_else(|| {
        WalletError::Store(StoreError::Corruption(format!(
            "melted session of coin {} has no noreveal index",
            session.coin_pub
        )))
    })? as usize;
    let inputs = run_read(state.db(), &[StoreName::Coins, StoreName::Denominations], |tx| {
        load_inputs(tx, session, details)
    })?;
    let derived = derive(
        state,
        &inputs,
        &session.amount_melt,
        &details.session_seed,
        details.kappa,
    )
    .await?;
    let kept = derived.planchets.get(noreveal).ok_or_else(|| {
        WalletError::Crypto(format!("derived session lacks planchet set {noreveal}"))
    })?;
    let coin_pub = inputs.coin.coin_pub;

    let body = RevealRequest {
        rc: derived.rc,
        transfer_pubs: derived.transfer_pubs.clone(),
        transfer_privs: derived
            .transfer_privs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != noreveal)
            .map(|(_, p)| p.clone())
            .collect(),
        new_denoms_h: inputs.new_denoms.iter().map(|d| d.denom_pub_hash).collect(),
        coin_evs: kept.iter().map(|p| p.blinded).collect(),
    };
    let url = exchange_api::join(
        &inputs.coin.exchange_base_url,
        &format!("coins/{}/reveal", coin_pub.to_crock()),
    )?;
    debug!(refresh_group_id, coin_pub = %coin_pub, "sending reveal");
    let resp: RevealResponse = exchange_api::post_json(state.http.as_ref(), &url, &body).await?;
    if resp.ev_sigs.len() != kept.len() {
        return Err(WalletError::ProtocolError {
            http_status: 200,
            code: 0,
            hint: format!("expected {} signatures, got {}", kept.len(), resp.ev_sigs.len()),
        });
    }

    let now = state.clock.now();
    let mut new_coins = Vec::with_capacity(kept.len());
    for (coin_index, ((planchet, ev_sig), denom)) in
        kept.iter().zip(&resp.ev_sigs).zip(&inputs.new_denoms).enumerate()
    {
        let denom_sig = state
            .crypto()
            .unblind_and_verify(UnblindRequest {
                blinded: planchet.blinded,
                ev_sig: *ev_sig,
                blinding_secret: planchet.blinding_secret.clone(),
                denom_pub: denom.denom_pub,
            })
            .await?;
        new_coins.push(CoinRecord {
            coin_pub: planchet.coin_pub,
            coin_priv: planchet.coin_priv.clone(),
            exchange_base_url: inputs.coin.exchange_base_url.clone(),
            denom_pub_hash: denom.denom_pub_hash,
            denom_sig,
            blinding_secret: planchet.blinding_secret.clone(),
            value: denom.value.clone(),
            status: CoinStatus::Fresh,
            source: CoinSource::Refresh {
                refresh_group_id: refresh_group_id.to_string(),
                old_coin_pub: coin_pub,
                coin_index: coin_index as u32,
            },
            spent_by: None,
            created_at: now,
        });
    }

    update_session(state, refresh_group_id, index, &[StoreName::Coins], |tx, s| {
        if s.status != RefreshSessionStatus::MeltConfirmed {
            return Ok(());
        }
        for coin in &new_coins {
            if record::get::<CoinRecord, _>(&*tx, coin.coin_pub.as_bytes())?.is_none() {
                record::put(tx, coin)?;
            }
        }
        s.status = RefreshSessionStatus::NewPlanchetsRevealed;
        s.last_error = None;
        Ok(())
    })?;
    info!(
        refresh_group_id,
        coin_pub = %coin_pub,
        new_coins = new_coins.len(),
        "refresh revealed"
    );
    state.notify(Notification::BalanceChanged);
    Ok(())
}

fn finish_group(state: &InternalWalletState, refresh_group_id: &str) -> Result<(), WalletError> {
    let now = state.clock.now();
    let tag = refresh_tag(refresh_group_id);
    let finished = run_write(
        state.db(),
        &[StoreName::RefreshGroups, StoreName::Coins],
        |tx| {
            let mut group =
                record::get_required::<RefreshGroupRecord, _>(&*tx, refresh_group_id.as_bytes())?;
            if group.status != RefreshGroupStatus::Pending || !group.all_sessions_final() {
                return Ok(None);
            }
            let failure: Option<ErrorDetail> = group
                .coins
                .iter()
                .find(|c| c.status == RefreshSessionStatus::Failed)
                .and_then(|c| c.last_error.clone());
            group.status = if group.coins.iter().any(|c| c.status == RefreshSessionStatus::Failed) {
                RefreshGroupStatus::Failed
            } else {
                RefreshGroupStatus::Done
            };
            group.finished_at = Some(now);
            group.last_error = failure.clone();
            // Coins the group reserved but never melted become spendable again.
            for c in &group.coins {
                if let Some(mut coin) = record::get::<CoinRecord, _>(&*tx, c.coin_pub.as_bytes())? {
                    if coin.is_fresh() && coin.spent_by.as_deref() == Some(tag.as_str()) {
                        coin.spent_by = None;
                        record::put(tx, &coin)?;
                    }
                }
            }
            record::put(tx, &group)?;
            Ok::<_, WalletError>(Some((group.status, failure)))
        },
    )?;

    match finished {
        Some((RefreshGroupStatus::Failed, failure)) => {
            let error = failure
                .unwrap_or_else(|| ErrorDetail::new("RefreshFailed", "refresh session failed"));
            error!(refresh_group_id, error = %error.hint, "refresh group failed");
            state.notify(Notification::OperationFailed { tag, error });
            state.notify(Notification::RefreshGroupFinished {
                refresh_group_id: refresh_group_id.to_string(),
            });
        }
        Some(_) => {
            info!(refresh_group_id, "refresh group finished");
            state.notify(Notification::RefreshGroupFinished {
                refresh_group_id: refresh_group_id.to_string(),
            });
            state.notify(Notification::BalanceChanged);
        }
        None => {}
    }
    Ok(())
}

/// Cancel a refresh group. Refused once a melt was confirmed.
pub fn abort_refresh(state: &InternalWalletState, refresh_group_id: &str) -> Result<(), WalletError> {
    let tag = refresh_tag(refresh_group_id);
    run_write(
        state.db(),
        &[StoreName::RefreshGroups, StoreName::Coins],
        |tx| {
            let mut group = record::get::<RefreshGroupRecord, _>(&*tx, refresh_group_id.as_bytes())?
                .ok_or_else(|| WalletError::NotFound(format!("refresh group {refresh_group_id}")))?;
            if group.status != RefreshGroupStatus::Pending {
                return Err(WalletError::InvalidRequest(format!(
                    "refresh group {refresh_group_id} already finished"
                )));
            }
            if group.has_confirmed_melt() {
                return Err(WalletError::InvalidRequest(format!(
                    "refresh group {refresh_group_id} has a confirmed melt and must complete"
                )));
            }
            group.status = RefreshGroupStatus::Cancelled;
            group.finished_at = Some(state.clock.now());
            for c in &group.coins {
                if let Some(mut coin) = record::get::<CoinRecord, _>(&*tx, c.coin_pub.as_bytes())? {
                    if coin.is_fresh() && coin.spent_by.as_deref() == Some(tag.as_str()) {
                        coin.spent_by = None;
                        record::put(tx, &coin)?;
                    }
                }
            }
            record::put(tx, &group)?;
            Ok(())
        },
    )?;
    info!(refresh_group_id, "refresh group cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEnv;
    use taler_nullables::{DenomSpec, FakeExchangeConfig};

    fn kudos(v: &str) -> Amount {
        Amount::parse(&format!("KUDOS:{v}")).unwrap()
    }

    #[tokio::test]
    async fn force_refresh_replaces_coin_with_equal_value() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["2", "1"]).unwrap());
        env.withdraw("KUDOS:2").await;
        let coin = env.coins().remove(0);
        let id = force_refresh(&env.state, &[coin.coin_pub]).unwrap();
        process_refresh_group(&env.state, &id).await.unwrap();

        let group = get_refresh_group(&env.state, &id).unwrap();
        assert_eq!(group.status, RefreshGroupStatus::Done);
        assert_eq!(group.coins[0].status, RefreshSessionStatus::NewPlanchetsRevealed);
        let coins = env.coins();
        let fresh: Vec<_> = coins.iter().filter(|c| c.is_fresh()).collect();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].value, kudos("2"));
        assert!(matches!(fresh[0].source, CoinSource::Refresh { .. }));
        let old = coins.iter().find(|c| c.coin_pub == coin.coin_pub).unwrap();
        assert_eq!(old.status, CoinStatus::Dormant);
    }

    #[tokio::test]
    async fn cancel_is_refused_after_melt_confirmed() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        env.withdraw("KUDOS:1").await;
        let coin = env.coins().remove(0);
        let id = force_refresh(&env.state, &[coin.coin_pub]).unwrap();
        env.exchange.inject_error("/reveal", 503);
        let err = process_refresh_group(&env.state, &id).await.unwrap_err();
        assert!(err.is_transient());

        let group = get_refresh_group(&env.state, &id).unwrap();
        assert!(group.has_confirmed_melt());
        let err = abort_refresh(&env.state, &id).unwrap_err();
        assert!(matches!(err, WalletError::InvalidRequest(_)));

        process_refresh_group(&env.state, &id).await.unwrap();
        assert_eq!(get_refresh_group(&env.state, &id).unwrap().status, RefreshGroupStatus::Done);
    }

    #[tokio::test]
    async fn cancel_before_melt_releases_coin() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        env.withdraw("KUDOS:1").await;
        let coin = env.coins().remove(0);
        let id = force_refresh(&env.state, &[coin.coin_pub]).unwrap();
        abort_refresh(&env.state, &id).unwrap();
        let coin = env.coins().remove(0);
        assert!(coin.is_fresh());
        assert!(coin.spent_by.is_none());
        assert_eq!(env.exchange.request_count("melt"), 0);
    }

    #[tokio::test]
    async fn leftover_below_refresh_fee_is_skipped() {
        let one = DenomSpec::new(kudos("1"))
            .unwrap()
            .with_fees(kudos("0"), kudos("0"), kudos("1"));
        let mut config = FakeExchangeConfig::with_values("KUDOS", &[]).unwrap();
        config.denominations.push(one);
        let env = FakeEnv::new(config);
        env.withdraw("KUDOS:1").await;
        let coin = env.coins().remove(0);
        let id = force_refresh(&env.state, &[coin.coin_pub]).unwrap();
        process_refresh_group(&env.state, &id).await.unwrap();
        let group = get_refresh_group(&env.state, &id).unwrap();
        assert_eq!(group.coins[0].status, RefreshSessionStatus::Skipped);
        assert_eq!(group.status, RefreshGroupStatus::Done);
        let coin = env.coins().remove(0);
        assert!(coin.is_fresh() && coin.spent_by.is_none());
    }

    #[tokio::test]
    async fn melt_of_spent_coin_marks_it_forbidden() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["2"]).unwrap());
        env.withdraw("KUDOS:2").await;
        let coin = env.coins().remove(0);
        let id = force_refresh(&env.state, &[coin.coin_pub]).unwrap();
        env.exchange.inject_error("/melt", 409);
        process_refresh_group(&env.state, &id).await.unwrap();

        let group = get_refresh_group(&env.state, &id).unwrap();
        assert_eq!(group.status, RefreshGroupStatus::Failed);
        assert_eq!(
            group.last_error.as_ref().map(|e| e.kind.as_str()),
            Some("DoubleSpendDetected")
        );
        assert_eq!(env.coins()[0].status, CoinStatus::Forbidden);
    }
}
