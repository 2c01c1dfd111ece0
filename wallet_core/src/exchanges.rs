//! Denomination registry: exchanges, their `/keys` and trust.
//!
//! `/keys` is validated before anything is stored: the signing key must carry
//! a valid master signature and must have signed the key set. Individual
//! denominations with bad master signatures are dropped with a warning, the
//! rest of the response is still accepted. Denominations listed for recoup
//! are marked revoked and fresh coins of them get a recoup group in the same
//! transaction.

use std::collections::HashSet;

use serde::Serialize;
use taler_crypto::{denom_pub_hash, random_id};
use taler_network::wire::{DenominationInfo, KeysResponse};
use taler_store::records::{
    AuditorInfo, AuditorTrustRecord, CoinRecord, CoinStatus, DenominationRecord,
    ExchangeDetailsRecord, ExchangeRecord, ExchangeTrustRecord, ExchangeUpdateStatus, RecoupCoin,
    RecoupGroupRecord, RecoupGroupStatus, RecoupStatus, SigningKeyInfo,
};
use taler_store::{record, run_read, run_write, ReadTxn, Record, StoreName, WriteTxn};
use taler_types::{EddsaPublicKey, HashCode, Timestamp};
use tracing::{debug, info, warn};

use crate::config::WalletConfig;
use crate::exchange_api::{self, canonicalize_base_url};
use crate::notifications::Notification;
use crate::state::InternalWalletState;
use crate::WalletError;

/// How long a successful `/keys` download stays fresh.
pub const EXCHANGE_UPDATE_INTERVAL_SECS: u64 = 24 * 3600;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrustStatus {
    /// The exchange's master key is trusted for its currency.
    pub is_trusted: bool,
    /// One of the exchange's auditors is trusted for its currency.
    pub is_audited: bool,
}

impl TrustStatus {
    pub fn is_acceptable(&self) -> bool {
        self.is_trusted || self.is_audited
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExchangeListItem {
    pub exchange_base_url: String,
    pub currency: Option<String>,
    pub master_pub: Option<EddsaPublicKey>,
    pub update_status: ExchangeUpdateStatus,
    pub last_update: Option<Timestamp>,
    pub trust: TrustStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub denominations: usize,
    pub dropped: usize,
    pub purged: usize,
    /// Unspent coins of purged denominations, now retired.
    pub retired_coins: usize,
    pub recoup_group_id: Option<String>,
}

/// Register an exchange (idempotent) and download its `/keys`.
pub async fn add_exchange(
    state: &InternalWalletState,
    base_url: &str,
) -> Result<ExchangeRecord, WalletError> {
    let base_url = canonicalize_base_url(base_url)?;
    let now = state.clock.now();
    let created = run_write(state.db(), &[StoreName::Exchanges], |tx| {
        if record::get::<ExchangeRecord, _>(&*tx, base_url.as_bytes())?.is_some() {
            return Ok::<_, WalletError>(false);
        }
        record::put(
            tx,
            &ExchangeRecord {
                base_url: base_url.clone(),
                added_at: now,
                update_status: ExchangeUpdateStatus::Initial,
                last_update: None,
                next_update: now,
                master_pub: None,
                currency: None,
                last_error: None,
            },
        )?;
        Ok(true)
    })?;
    if created {
        info!(exchange = %base_url, "exchange added");
    }
    update_exchange(state, &base_url).await
}

/// Download and ingest `/keys`. On failure the exchange is marked `Failed`
/// and previously stored details stay usable.
pub async fn update_exchange(
    state: &InternalWalletState,
    base_url: &str,
) -> Result<ExchangeRecord, WalletError> {
    debug!(exchange = %base_url, "updating exchange");
    let result = async {
        let url = exchange_api::join(base_url, "keys")?;
        let keys: KeysResponse = exchange_api::get_json(state.http.as_ref(), &url).await?;
        ingest_keys(state, base_url, keys).await
    }
    .await;

    match result {
        Ok(outcome) => {
            info!(
                exchange = %base_url,
                denominations = outcome.denominations,
                dropped = outcome.dropped,
                purged = outcome.purged,
                retired_coins = outcome.retired_coins,
                "exchange updated"
            );
            state.notify(Notification::ExchangeUpdated {
                exchange_base_url: base_url.to_string(),
            });
            if let Some(recoup_group_id) = outcome.recoup_group_id {
                state.notify(Notification::RecoupStarted { recoup_group_id });
            }
            get_exchange(state, base_url)
        }
        Err(e) => {
            warn!(exchange = %base_url, error = %e, "exchange update failed");
            let detail = e.to_detail();
            run_write(state.db(), &[StoreName::Exchanges], |tx| {
                if let Some(mut ex) = record::get::<ExchangeRecord, _>(&*tx, base_url.as_bytes())? {
                    ex.update_status = ExchangeUpdateStatus::Failed;
                    ex.last_error = Some(detail);
                    record::put(tx, &ex)?;
                }
                Ok::<_, WalletError>(())
            })?;
            Err(e)
        }
    }
}

fn well_formed(d: &DenominationInfo, currency: &str) -> bool {
    let amounts = [&d.value, &d.fee_withdraw, &d.fee_deposit, &d.fee_refresh, &d.fee_refund];
    amounts.iter().all(|a| a.currency() == currency)
        && !d.value.is_zero()
        && d.stamp_start < d.stamp_expire_withdraw
        && d.stamp_expire_withdraw <= d.stamp_expire_deposit
        && d.stamp_expire_deposit <= d.stamp_expire_legal
}

/// Validate a `/keys` response and store it.
pub async fn ingest_keys(
    state: &InternalWalletState,
    base_url: &str,
    keys: KeysResponse,
) -> Result<IngestOutcome, WalletError> {
    let now = state.clock.now();
    let master_pub = keys.master_public_key;
    if keys.denoms.is_empty() {
        return Err(WalletError::InvalidKeysResponse("no denominations".into()));
    }

    let signkey = keys
        .signkeys
        .iter()
        .find(|k| k.key == keys.eddsa_pub)
        .cloned()
        .ok_or_else(|| {
            WalletError::InvalidKeysResponse("key set signed by an unlisted signing key".into())
        })?;
    if !state
        .crypto()
        .is_valid_signing_key(master_pub, signkey.clone())
        .await?
    {
        return Err(WalletError::InvalidKeysResponse(
            "bad master signature on signing key".into(),
        ));
    }
    if now < signkey.stamp_start || now >= signkey.stamp_expire {
        return Err(WalletError::InvalidKeysResponse(
            "signing key outside its validity period".into(),
        ));
    }

    let hashes: Vec<HashCode> = keys.denoms.iter().map(|d| denom_pub_hash(&d.denom_pub)).collect();
    if !state
        .crypto()
        .is_valid_key_set(keys.list_issue_date, hashes.clone(), keys.eddsa_pub, keys.eddsa_sig)
        .await?
    {
        return Err(WalletError::InvalidKeysResponse("bad key set signature".into()));
    }

    let mut accepted = Vec::with_capacity(keys.denoms.len());
    let mut dropped = 0;
    for (d, hash) in keys.denoms.iter().zip(&hashes) {
        if !well_formed(d, &keys.currency) {
            warn!(exchange = %base_url, denom = %hash.short(), "dropping malformed denomination");
            dropped += 1;
            continue;
        }
        if !state.crypto().is_valid_denomination(master_pub, d.clone()).await? {
            warn!(exchange = %base_url, denom = %hash.short(), "dropping denomination with bad master signature");
            dropped += 1;
            continue;
        }
        accepted.push((d, *hash));
    }
    if accepted.is_empty() {
        return Err(WalletError::InvalidKeysResponse("no valid denominations".into()));
    }

    let revoked: HashSet<HashCode> = keys.recoup.iter().map(|r| r.h_denom_pub).collect();
    let signing_keys: Vec<SigningKeyInfo> = keys
        .signkeys
        .iter()
        .map(|k| SigningKeyInfo {
            key: k.key,
            stamp_start: k.stamp_start,
            stamp_expire: k.stamp_expire,
            master_sig: k.master_sig,
        })
        .collect();
    let auditors: Vec<AuditorInfo> = keys
        .auditors
        .iter()
        .map(|a| AuditorInfo {
            auditor_pub: a.auditor_pub,
            auditor_url: a.auditor_url.clone(),
        })
        .collect();

    let stores = [
        StoreName::Exchanges,
        StoreName::ExchangeDetails,
        StoreName::Denominations,
        StoreName::Coins,
        StoreName::RecoupGroups,
    ];
    run_write(state.db(), &stores, |tx| {
        if let Some(old) = record::get::<ExchangeDetailsRecord, _>(&*tx, base_url.as_bytes())? {
            if old.currency != keys.currency {
                return Err(WalletError::InvalidKeysResponse(format!(
                    "currency changed from {} to {}",
                    old.currency, keys.currency
                )));
            }
            if old.master_pub != master_pub {
                return Err(WalletError::InvalidKeysResponse("master public key changed".into()));
            }
        }

        let mut outcome = IngestOutcome {
            dropped,
            ..IngestOutcome::default()
        };
        let offered: HashSet<HashCode> = accepted.iter().map(|(_, h)| *h).collect();
        let mut newly_revoked = Vec::new();
        let mut purged = HashSet::new();

        let existing: Vec<DenominationRecord> =
            record::iter_prefix(&*tx, &DenominationRecord::exchange_prefix(base_url))?;
        for mut old in existing {
            if offered.contains(&old.denom_pub_hash) {
                continue;
            }
            if old.is_legally_expired(now) {
                record::delete::<DenominationRecord, _>(tx, &old.key())?;
                purged.insert(old.denom_pub_hash);
                continue;
            }
            let was_revoked = old.is_revoked;
            old.is_offered = false;
            old.is_revoked |= revoked.contains(&old.denom_pub_hash);
            if old.is_revoked && !was_revoked {
                newly_revoked.push(old.denom_pub_hash);
            }
            record::put(tx, &old)?;
        }

        for (d, hash) in &accepted {
            let previous = record::get::<DenominationRecord, _>(
                &*tx,
                &DenominationRecord::key_for(base_url, hash),
            )?;
            let rec = DenominationRecord {
                exchange_base_url: base_url.to_string(),
                denom_pub: d.denom_pub,
                denom_pub_hash: *hash,
                value: d.value.clone(),
                fee_withdraw: d.fee_withdraw.clone(),
                fee_deposit: d.fee_deposit.clone(),
                fee_refresh: d.fee_refresh.clone(),
                fee_refund: d.fee_refund.clone(),
                stamp_start: d.stamp_start,
                stamp_expire_withdraw: d.stamp_expire_withdraw,
                stamp_expire_deposit: d.stamp_expire_deposit,
                stamp_expire_legal: d.stamp_expire_legal,
                master_sig: d.master_sig,
                is_revoked: revoked.contains(hash) || previous.as_ref().is_some_and(|p| p.is_revoked),
                is_offered: true,
            };
            if rec.is_legally_expired(now) {
                if previous.is_some() {
                    record::delete::<DenominationRecord, _>(tx, &rec.key())?;
                    purged.insert(*hash);
                }
                continue;
            }
            if rec.is_revoked && !previous.as_ref().is_some_and(|p| p.is_revoked) {
                newly_revoked.push(*hash);
            }
            record::put(tx, &rec)?;
            outcome.denominations += 1;
        }

        outcome.purged = purged.len();
        if !purged.is_empty() {
            outcome.retired_coins = retire_coins(tx, base_url, &purged)?;
        }

        if !newly_revoked.is_empty() {
            outcome.recoup_group_id = create_recoup_group(tx, base_url, &newly_revoked, now)?;
        }

        record::put(
            tx,
            &ExchangeDetailsRecord {
                base_url: base_url.to_string(),
                currency: keys.currency.clone(),
                master_pub,
                protocol_version: keys.version.clone(),
                list_issue_date: keys.list_issue_date,
                signing_keys: signing_keys.clone(),
                auditors: auditors.clone(),
            },
        )?;

        let mut exchange = record::get::<ExchangeRecord, _>(&*tx, base_url.as_bytes())?
            .ok_or_else(|| WalletError::UnknownExchange(base_url.to_string()))?;
        exchange.update_status = ExchangeUpdateStatus::Ready;
        exchange.last_update = Some(now);
        exchange.next_update = now.add_secs(EXCHANGE_UPDATE_INTERVAL_SECS);
        exchange.master_pub = Some(master_pub);
        exchange.currency = Some(keys.currency.clone());
        exchange.last_error = None;
        record::put(tx, &exchange)?;
        Ok(outcome)
    })
}

/// Put the fresh coins of `revoked` denominations into a new recoup group.
fn create_recoup_group<T: WriteTxn + ?Sized>(
    tx: &mut T,
    base_url: &str,
    revoked: &[HashCode],
    now: Timestamp,
) -> Result<Option<String>, WalletError> {
    let mut coins = Vec::new();
    for hash in revoked {
        let affected: Vec<CoinRecord> = record::iter_index(&*tx, "denom", hash.as_bytes())?;
        coins.extend(
            affected
                .into_iter()
                .filter(|c| c.exchange_base_url == base_url && c.is_fresh() && c.spent_by.is_none()),
        );
    }
    if coins.is_empty() {
        return Ok(None);
    }
    let recoup_group_id = random_id();
    let tag = format!("recoup:{recoup_group_id}");
    for coin in &mut coins {
        coin.spent_by = Some(tag.clone());
        record::put(tx, coin)?;
    }
    info!(
        exchange = %base_url,
        recoup_group_id = %recoup_group_id,
        coins = coins.len(),
        "denominations revoked, recouping coins"
    );
    record::put(
        tx,
        &RecoupGroupRecord {
            recoup_group_id: recoup_group_id.clone(),
            exchange_base_url: base_url.to_string(),
            coins: coins
                .iter()
                .map(|c| RecoupCoin {
                    coin_pub: c.coin_pub,
                    status: RecoupStatus::Pending,
                })
                .collect(),
            status: RecoupGroupStatus::Pending,
            created_at: now,
            finished_at: None,
            last_error: None,
        },
    )?;
    Ok(Some(recoup_group_id))
}

pub fn get_exchange(
    state: &InternalWalletState,
    base_url: &str,
) -> Result<ExchangeRecord, WalletError> {
    run_read(state.db(), &[StoreName::Exchanges], |tx| {
        record::get::<ExchangeRecord, _>(tx, base_url.as_bytes())?
            .ok_or_else(|| WalletError::UnknownExchange(base_url.to_string()))
    })
}

pub fn get_details<T: ReadTxn + ?Sized>(
    tx: &T,
    base_url: &str,
) -> Result<ExchangeDetailsRecord, WalletError> {
    record::get::<ExchangeDetailsRecord, _>(tx, base_url.as_bytes())?
        .ok_or_else(|| WalletError::UnknownExchange(base_url.to_string()))
}

/// Details of an exchange, adding it or refreshing `/keys` first if they are
/// missing or stale.
pub async fn ensure_exchange_ready(
    state: &InternalWalletState,
    base_url: &str,
) -> Result<ExchangeDetailsRecord, WalletError> {
    let base_url = canonicalize_base_url(base_url)?;
    match get_exchange(state, &base_url) {
        Ok(ex) if ex.update_status == ExchangeUpdateStatus::Ready && ex.next_update > state.clock.now() => {}
        Ok(_) => {
            update_exchange(state, &base_url).await?;
        }
        Err(WalletError::UnknownExchange(_)) => {
            add_exchange(state, &base_url).await?;
        }
        Err(e) => return Err(e),
    }
    run_read(state.db(), &[StoreName::ExchangeDetails], |tx| get_details(tx, &base_url))
}

/// Denominations of `base_url` that can be withdrawn at `now`, largest value
/// first and cheapest first among equal values.
pub fn selectable_denominations<T: ReadTxn + ?Sized>(
    tx: &T,
    base_url: &str,
    now: Timestamp,
) -> Result<Vec<DenominationRecord>, WalletError> {
    let mut denoms: Vec<DenominationRecord> =
        record::iter_prefix(tx, &DenominationRecord::exchange_prefix(base_url))?;
    denoms.retain(|d| d.is_withdrawable(now));
    denoms.sort_by(|a, b| {
        b.value
            .to_units()
            .cmp(&a.value.to_units())
            .then(a.fee_withdraw.to_units().cmp(&b.fee_withdraw.to_units()))
    });
    Ok(denoms)
}

/// Coins of a purged denomination can no longer be deposited, melted or
/// recouped. Unreserved ones leave the spendable set.
fn retire_coins<T: WriteTxn + ?Sized>(
    tx: &mut T,
    base_url: &str,
    purged: &HashSet<HashCode>,
) -> Result<usize, WalletError> {
    let mut retired = 0;
    for mut coin in record::iter::<CoinRecord, _>(&*tx)? {
        if coin.exchange_base_url != base_url
            || !purged.contains(&coin.denom_pub_hash)
            || !coin.is_fresh()
            || coin.spent_by.is_some()
        {
            continue;
        }
        coin.status = CoinStatus::Dormant;
        record::put(tx, &coin)?;
        retired += 1;
    }
    if retired > 0 {
        info!(exchange = %base_url, coins = retired, "retired coins of legally expired denominations");
    }
    Ok(retired)
}

/// Look up a denomination that may have been purged.
pub fn find_denomination<T: ReadTxn + ?Sized>(
    tx: &T,
    base_url: &str,
    denom_pub_hash: &HashCode,
) -> Result<Option<DenominationRecord>, WalletError> {
    Ok(record::get::<DenominationRecord, _>(
        tx,
        &DenominationRecord::key_for(base_url, denom_pub_hash),
    )?)
}

pub fn get_denomination<T: ReadTxn + ?Sized>(
    tx: &T,
    base_url: &str,
    denom_pub_hash: &HashCode,
) -> Result<DenominationRecord, WalletError> {
    find_denomination(tx, base_url, denom_pub_hash)?
        .ok_or_else(|| {
            WalletError::NotFound(format!("denomination {} of {base_url}", denom_pub_hash.short()))
        })
}

pub fn trust_status<T: ReadTxn + ?Sized>(
    tx: &T,
    base_url: &str,
) -> Result<TrustStatus, WalletError> {
    let Some(details) = record::get::<ExchangeDetailsRecord, _>(tx, base_url.as_bytes())? else {
        return Ok(TrustStatus::default());
    };
    let is_trusted = record::get::<ExchangeTrustRecord, _>(
        tx,
        &ExchangeTrustRecord::key_for(&details.master_pub, &details.currency),
    )?
    .is_some();
    let mut is_audited = false;
    for auditor in &details.auditors {
        let key = AuditorTrustRecord::key_for(&auditor.auditor_pub, &details.currency);
        if record::get::<AuditorTrustRecord, _>(tx, &key)?.is_some() {
            is_audited = true;
            break;
        }
    }
    Ok(TrustStatus {
        is_trusted,
        is_audited,
    })
}

pub fn get_exchange_trust(
    state: &InternalWalletState,
    base_url: &str,
) -> Result<TrustStatus, WalletError> {
    let base_url = canonicalize_base_url(base_url)?;
    run_read(
        state.db(),
        &[StoreName::ExchangeDetails, StoreName::ExchangeTrust, StoreName::AuditorTrust],
        |tx| trust_status(tx, &base_url),
    )
}

/// Trust the current master key of a known exchange for its currency.
pub fn set_exchange_trust(
    state: &InternalWalletState,
    base_url: &str,
) -> Result<TrustStatus, WalletError> {
    let base_url = canonicalize_base_url(base_url)?;
    let stores = [
        StoreName::ExchangeDetails,
        StoreName::ExchangeTrust,
        StoreName::AuditorTrust,
    ];
    run_write(state.db(), &stores, |tx| {
        let details = get_details(&*tx, &base_url)?;
        record::put(
            tx,
            &ExchangeTrustRecord {
                master_pub: details.master_pub,
                currency: details.currency.clone(),
                exchange_base_url: base_url.clone(),
            },
        )?;
        info!(exchange = %base_url, currency = %details.currency, "exchange trusted");
        trust_status(&*tx, &base_url)
    })
}

/// Pre-seed the trust stores from the configuration.
pub fn seed_trust(state: &InternalWalletState, config: &WalletConfig) -> Result<(), WalletError> {
    if config.trusted_exchanges.is_empty() && config.trusted_auditors.is_empty() {
        return Ok(());
    }
    run_write(
        state.db(),
        &[StoreName::ExchangeTrust, StoreName::AuditorTrust],
        |tx| {
            for ex in &config.trusted_exchanges {
                record::put(
                    tx,
                    &ExchangeTrustRecord {
                        master_pub: ex.master_pub,
                        currency: ex.currency.to_ascii_uppercase(),
                        exchange_base_url: canonicalize_base_url(&ex.base_url)?,
                    },
                )?;
            }
            for au in &config.trusted_auditors {
                record::put(
                    tx,
                    &AuditorTrustRecord {
                        auditor_pub: au.auditor_pub,
                        currency: au.currency.to_ascii_uppercase(),
                        auditor_base_url: au.auditor_url.clone(),
                    },
                )?;
            }
            Ok::<_, WalletError>(())
        },
    )
}

pub fn list_exchanges(state: &InternalWalletState) -> Result<Vec<ExchangeListItem>, WalletError> {
    let stores = [
        StoreName::Exchanges,
        StoreName::ExchangeDetails,
        StoreName::ExchangeTrust,
        StoreName::AuditorTrust,
    ];
    run_read(state.db(), &stores, |tx| {
        let exchanges: Vec<ExchangeRecord> = record::iter(tx)?;
        exchanges
            .into_iter()
            .map(|ex| {
                Ok(ExchangeListItem {
                    trust: trust_status(tx, &ex.base_url)?,
                    update_status: ex.update_status,
                    exchange_base_url: ex.base_url,
                    currency: ex.currency,
                    master_pub: ex.master_pub,
                    last_update: ex.last_update,
                })
            })
            .collect()
    })
}
