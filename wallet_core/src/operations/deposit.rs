//! Deposit groups: paying coins into the wallet owner's bank account.

use serde::Serialize;
use serde_json::json;
use taler_crypto::{canonicalize, random_id, wire_hash};
use taler_network::wire::{DepositRequest, DepositResponse};
use taler_selection::{select_payment_coins, CandidateCoin, PaymentTarget};
use taler_store::records::{
    CoinRecord, CoinStatus, DepositCoin, DepositGroupRecord, DepositStatus, RefreshReason,
};
use taler_store::{record, run_read, run_write, StoreName};
use taler_types::Amount;
use tracing::{debug, info};

use crate::crypto_worker::{DepositConfirmationCheck, DepositSignRequest};
use crate::exchange_api;
use crate::exchanges::{find_denomination, get_details};
use crate::notifications::Notification;
use crate::operations::refresh::create_refresh_group;
use crate::operations::{get_coin, is_double_spend, mark_forbidden};
use crate::state::InternalWalletState;
use crate::WalletError;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DepositGroupCreated {
    pub deposit_group_id: String,
    pub transaction_id: String,
    pub amount_effective: Amount,
    pub total_deposit_fees: Amount,
}

pub fn deposit_tag(deposit_group_id: &str) -> String {
    format!("deposit:{deposit_group_id}")
}

/// Allocate coins worth `amount` and record a deposit into `payto_uri`.
///
/// Nothing is written when the balance is insufficient.
pub async fn create_deposit_group(
    state: &InternalWalletState,
    amount: Amount,
    payto_uri: &str,
) -> Result<DepositGroupCreated, WalletError> {
    if !payto_uri.starts_with("payto://") {
        return Err(WalletError::InvalidRequest(format!("not a payto URI: {payto_uri}")));
    }
    if amount.is_zero() {
        return Err(WalletError::InvalidRequest("deposit amount must be positive".into()));
    }
    let now = state.clock.now();
    let (merchant_pub, merchant_priv) = state.crypto().create_eddsa_keypair().await?;
    let wire_salt = random_id();
    let h_wire = wire_hash(payto_uri, wire_salt.as_bytes());
    let contract_terms = canonicalize(&json!({
        "amount": amount,
        "h_wire": h_wire,
        "merchant_pub": merchant_pub,
        "nonce": random_id(),
        "refund_deadline": now,
        "timestamp": now,
    }));
    let h_contract = state.crypto().hash_string(contract_terms.clone()).await?;

    let deposit_group_id = random_id();
    let tag = deposit_tag(&deposit_group_id);
    let stores = [
        StoreName::Coins,
        StoreName::Denominations,
        StoreName::DepositGroups,
    ];
    let group = run_write(state.db(), &stores, |tx| {
        let mut candidates = Vec::new();
        for coin in record::iter::<CoinRecord, _>(&*tx)? {
            if !coin.is_fresh() || coin.spent_by.is_some() || coin.value.currency() != amount.currency() {
                continue;
            }
            let Some(denom) = find_denomination(&*tx, &coin.exchange_base_url, &coin.denom_pub_hash)?
            else {
                continue;
            };
            if !denom.is_depositable(now) {
                continue;
            }
            candidates.push(CandidateCoin {
                coin_pub: coin.coin_pub,
                exchange_base_url: coin.exchange_base_url,
                denom_pub_hash: coin.denom_pub_hash,
                value: coin.value,
                fee_deposit: denom.fee_deposit,
                expire_deposit: denom.stamp_expire_deposit,
            });
        }
        let sel = select_payment_coins(
            &candidates,
            &PaymentTarget {
                amount: amount.clone(),
                max_deposit_fee: amount.clone(),
            },
        )?;
        debug!(
            candidates = candidates.len(),
            selected = sel.coins.len(),
            iterations = sel.iterations,
            needs_refresh = sel.needs_refresh,
            "coins selected for deposit"
        );

        let mut coins = Vec::with_capacity(sel.coins.len());
        for selected in sel.coins {
            let mut coin = get_coin(&*tx, &selected.coin_pub)?;
            coin.spent_by = Some(tag.clone());
            record::put(tx, &coin)?;
            coins.push(DepositCoin {
                coin_pub: selected.coin_pub,
                exchange_base_url: selected.exchange_base_url,
                denom_pub_hash: selected.denom_pub_hash,
                contribution: selected.contribution,
                fee_deposit: selected.fee_deposit,
                partial: selected.partial,
                coin_sig: None,
                denom_sig: coin.denom_sig,
                deposited: false,
                exchange_sig: None,
                exchange_pub: None,
            });
        }

        let group = DepositGroupRecord {
            deposit_group_id: deposit_group_id.clone(),
            payto_uri: payto_uri.to_string(),
            wire_salt,
            h_wire,
            contract_terms,
            h_contract,
            merchant_pub,
            merchant_priv,
            amount: amount.clone(),
            effective_amount: sel.total_contribution.checked_sub(&sel.total_deposit_fees)?,
            total_deposit_fees: sel.total_deposit_fees,
            timestamp: now,
            refund_deadline: now,
            coins,
            status: DepositStatus::Pending,
            created_at: now,
            finished_at: None,
            last_error: None,
        };
        record::insert(tx, &group)?;
        Ok::<_, WalletError>(group)
    })?;

    info!(
        deposit_group_id = %group.deposit_group_id,
        amount = %group.amount,
        coins = group.coins.len(),
        fees = %group.total_deposit_fees,
        "deposit group created"
    );
    state.wake();
    Ok(DepositGroupCreated {
        transaction_id: tag,
        deposit_group_id: group.deposit_group_id,
        amount_effective: group.effective_amount,
        total_deposit_fees: group.total_deposit_fees,
    })
}

pub fn get_deposit_group(
    state: &InternalWalletState,
    deposit_group_id: &str,
) -> Result<DepositGroupRecord, WalletError> {
    run_read(state.db(), &[StoreName::DepositGroups], |tx| {
        record::get::<DepositGroupRecord, _>(tx, deposit_group_id.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("deposit group {deposit_group_id}")))
    })
}

pub async fn process_deposit_group(
    state: &InternalWalletState,
    deposit_group_id: &str,
) -> Result<(), WalletError> {
    loop {
        let group = get_deposit_group(state, deposit_group_id)?;
        debug!(deposit_group_id, status = ?group.status, "processing deposit group");
        match group.status {
            DepositStatus::Pending => sign_coins(state, &group).await?,
            DepositStatus::ContractSigned => {
                set_status(state, deposit_group_id, DepositStatus::ContractSigned, DepositStatus::DepositSent)?
            }
            DepositStatus::DepositSent => return send_deposits(state, &group).await,
            DepositStatus::Confirmed | DepositStatus::Failed | DepositStatus::Cancelled => {
                return Ok(())
            }
        }
    }
}

fn set_status(
    state: &InternalWalletState,
    deposit_group_id: &str,
    from: DepositStatus,
    to: DepositStatus,
) -> Result<(), WalletError> {
    run_write(state.db(), &[StoreName::DepositGroups], |tx| {
        let mut group = record::get_required::<DepositGroupRecord, _>(&*tx, deposit_group_id.as_bytes())?;
        if group.status == from {
            group.status = to;
            record::put(tx, &group)?;
        }
        Ok::<_, WalletError>(())
    })?;
    info!(deposit_group_id, ?from, ?to, "deposit group status changed");
    Ok(())
}

/// Compute every coin's deposit permission once and persist it.
async fn sign_coins(state: &InternalWalletState, group: &DepositGroupRecord) -> Result<(), WalletError> {
    let mut sigs = Vec::with_capacity(group.coins.len());
    for dc in &group.coins {
        if let Some(sig) = dc.coin_sig {
            sigs.push(sig);
            continue;
        }
        let coin = run_read(state.db(), &[StoreName::Coins], |tx| get_coin(tx, &dc.coin_pub))?;
        let sig = state
            .crypto()
            .sign_deposit(DepositSignRequest {
                coin_priv: coin.coin_priv,
                contract_terms_hash: group.h_contract,
                wire_hash: group.h_wire,
                denom_pub_hash: dc.denom_pub_hash,
                timestamp: group.timestamp,
                refund_deadline: group.refund_deadline,
                contribution: dc.contribution.clone(),
                fee_deposit: dc.fee_deposit.clone(),
                merchant_pub: group.merchant_pub,
            })
            .await?;
        sigs.push(sig);
    }

    let id = group.deposit_group_id.as_str();
    run_write(state.db(), &[StoreName::DepositGroups], |tx| {
        let mut group = record::get_required::<DepositGroupRecord, _>(&*tx, id.as_bytes())?;
        if group.status != DepositStatus::Pending {
            return Ok(());
        }
        for (dc, sig) in group.coins.iter_mut().zip(&sigs) {
            dc.coin_sig.get_or_insert(*sig);
        }
        group.status = DepositStatus::ContractSigned;
        record::put(tx, &group)?;
        Ok::<_, WalletError>(())
    })?;
    info!(deposit_group_id = id, coins = sigs.len(), "deposit permissions signed");
    Ok(())
}

async fn send_deposits(state: &InternalWalletState, group: &DepositGroupRecord) -> Result<(), WalletError> {
    let id = group.deposit_group_id.as_str();
    let details = run_read(state.db(), &[StoreName::ExchangeDetails], |tx| {
        let mut out = Vec::new();
        for dc in &group.coins {
            out.push(get_details(tx, &dc.exchange_base_url)?);
        }
        Ok::<_, WalletError>(out)
    })?;

    for (index, (dc, exchange)) in group.coins.iter().zip(&details).enumerate() {
        if dc.deposited {
            continue;
        }
        let coin_sig = dc.coin_sig.ok_or_else(|| {
            WalletError::InvalidRequest(format!("deposit permission of coin {} missing", dc.coin_pub))
        })?;
        let body = DepositRequest {
            contribution: dc.contribution.clone(),
            denom_pub_hash: dc.denom_pub_hash,
            ub_sig: dc.denom_sig,
            merchant_pub: group.merchant_pub,
            h_contract_terms: group.h_contract,
            h_wire: group.h_wire,
            wire: group.payto_uri.clone(),
            wire_salt: group.wire_salt.clone(),
            timestamp: group.timestamp,
            refund_deadline: group.refund_deadline,
            coin_sig,
        };
        let url = exchange_api::join(
            &dc.exchange_base_url,
            &format!("coins/{}/deposit", dc.coin_pub.to_crock()),
        )?;
        debug!(deposit_group_id = id, coin_pub = %dc.coin_pub, "sending deposit");
        let resp: DepositResponse = match exchange_api::post_json(state.http.as_ref(), &url, &body).await {
            Ok(r) => r,
            Err(e) if is_double_spend(&e) => {
                run_write(state.db(), &[StoreName::Coins], |tx| mark_forbidden(tx, &dc.coin_pub))?;
                state.notify(Notification::CoinDoubleSpent { coin_pub: dc.coin_pub });
                return Err(WalletError::DoubleSpendDetected { coin_pub: dc.coin_pub });
            }
            Err(e) => return Err(e),
        };

        let valid = exchange.signing_keys.iter().any(|k| k.key == resp.exchange_pub)
            && state
                .crypto()
                .is_valid_deposit_confirmation(DepositConfirmationCheck {
                    contract_terms_hash: group.h_contract,
                    wire_hash: group.h_wire,
                    timestamp: group.timestamp,
                    amount_without_fee: dc.contribution.checked_sub(&dc.fee_deposit)?,
                    coin_pub: dc.coin_pub,
                    merchant_pub: group.merchant_pub,
                    exchange_pub: resp.exchange_pub,
                    sig: resp.exchange_sig,
                })
                .await?;
        if !valid {
            return Err(WalletError::ProtocolError {
                http_status: 200,
                code: 0,
                hint: "invalid deposit confirmation signature".into(),
            });
        }

        confirm_coin(state, id, index, &resp)?;
        info!(deposit_group_id = id, coin_pub = %dc.coin_pub, "deposit confirmed");
        state.notify(Notification::DepositConfirmed {
            deposit_group_id: id.to_string(),
            coin_pub: dc.coin_pub,
        });
    }

    let now = state.clock.now();
    run_write(state.db(), &[StoreName::DepositGroups], |tx| {
        let mut group = record::get_required::<DepositGroupRecord, _>(&*tx, id.as_bytes())?;
        if group.status == DepositStatus::DepositSent && group.coins.iter().all(|c| c.deposited) {
            group.status = DepositStatus::Confirmed;
            group.finished_at = Some(now);
            group.last_error = None;
            record::put(tx, &group)?;
        }
        Ok::<_, WalletError>(())
    })?;
    info!(deposit_group_id = id, amount = %group.amount, "deposit group finished");
    state.notify(Notification::DepositGroupFinished {
        deposit_group_id: id.to_string(),
    });
    state.notify(Notification::BalanceChanged);
    Ok(())
}

/// Record a coin's deposit confirmation, retire the coin and queue the
/// refresh of its leftover, all in one transaction.
fn confirm_coin(
    state: &InternalWalletState,
    deposit_group_id: &str,
    index: usize,
    resp: &DepositResponse,
) -> Result<(), WalletError> {
    let now = state.clock.now();
    let stores = [
        StoreName::DepositGroups,
        StoreName::Coins,
        StoreName::Denominations,
        StoreName::RefreshGroups,
    ];
    run_write(state.db(), &stores, |tx| {
        let mut group = record::get_required::<DepositGroupRecord, _>(&*tx, deposit_group_id.as_bytes())?;
        let Some(dc) = group.coins.get_mut(index) else {
            return Ok(());
        };
        if dc.deposited {
            return Ok(());
        }
        dc.deposited = true;
        dc.exchange_pub = Some(resp.exchange_pub);
        dc.exchange_sig = Some(resp.exchange_sig);
        let coin_pub = dc.coin_pub;
        let contribution = dc.contribution.clone();
        let partial = dc.partial;
        record::put(tx, &group)?;

        let mut coin = get_coin(&*tx, &coin_pub)?;
        if coin.status == CoinStatus::Fresh {
            coin.status = CoinStatus::Dormant;
        }
        let leftover = coin.value.checked_sub(&contribution)?;
        record::put(tx, &coin)?;
        if partial && !leftover.is_zero() {
            create_refresh_group(tx, RefreshReason::PayDeposit, &[(coin_pub, leftover)], now)?;
        }
        Ok::<_, WalletError>(())
    })
}

/// Cancel a deposit group that is not final. Coins not yet deposited become
/// spendable again.
pub fn abort_deposit(state: &InternalWalletState, deposit_group_id: &str) -> Result<(), WalletError> {
    let tag = deposit_tag(deposit_group_id);
    run_write(state.db(), &[StoreName::DepositGroups, StoreName::Coins], |tx| {
        let mut group = record::get::<DepositGroupRecord, _>(&*tx, deposit_group_id.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("deposit group {deposit_group_id}")))?;
        if group.status.is_final() {
            return Err(WalletError::InvalidRequest(format!(
                "deposit group {deposit_group_id} already finished"
            )));
        }
        group.status = DepositStatus::Cancelled;
        group.finished_at = Some(state.clock.now());
        for dc in group.coins.iter().filter(|c| !c.deposited) {
            let mut coin = get_coin(&*tx, &dc.coin_pub)?;
            if coin.is_fresh() && coin.spent_by.as_deref() == Some(tag.as_str()) {
                coin.spent_by = None;
                record::put(tx, &coin)?;
            }
        }
        record::put(tx, &group)?;
        Ok(())
    })?;
    info!(deposit_group_id, "deposit group cancelled");
    Ok(())
}
