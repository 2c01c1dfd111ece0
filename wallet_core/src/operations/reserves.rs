//! Reserves: creation, funding through the test bank and turning the
//! balance into withdrawal groups.

use serde::Serialize;
use taler_crypto::{random_id, random_seed};
use taler_network::wire::{AddIncomingRequest, AddIncomingResponse, ReserveStatusResponse};
use taler_selection::select_withdrawal_denoms;
use taler_store::records::{
    ReserveRecord, ReserveStatus, WithdrawalGroupRecord, WithdrawalStatus,
};
use taler_store::{record, run_read, run_write, StoreName};
use taler_types::{Amount, EddsaPublicKey};
use tracing::{debug, info};

use crate::exchange_api::{self, canonicalize_base_url};
use crate::exchanges::{ensure_exchange_ready, get_exchange_trust, selectable_denominations};
use crate::notifications::Notification;
use crate::state::InternalWalletState;
use crate::WalletError;

/// Account the test bank debits when funding a reserve.
pub const FAKEBANK_DEBIT_ACCOUNT: &str = "payto://x-taler-bank/localhost/testdebtor";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReserveCreated {
    pub reserve_pub: EddsaPublicKey,
    pub exchange_base_url: String,
    pub amount: Amount,
    pub transaction_id: String,
}

/// Create a reserve at `exchange_base_url` for `amount`.
///
/// With `bank_base_url` the reserve is funded by that test bank when the
/// reserve task first runs. Without it the reserve waits for a transfer made
/// by other means.
pub async fn create_reserve(
    state: &InternalWalletState,
    exchange_base_url: &str,
    amount: Amount,
    bank_base_url: Option<&str>,
    accept_untrusted: bool,
) -> Result<ReserveCreated, WalletError> {
    if amount.is_zero() {
        return Err(WalletError::InvalidRequest("reserve amount must be positive".into()));
    }
    let exchange_base_url = canonicalize_base_url(exchange_base_url)?;
    let bank_base_url = bank_base_url.map(canonicalize_base_url).transpose()?;
    let details = ensure_exchange_ready(state, &exchange_base_url).await?;
    if details.currency != amount.currency() {
        return Err(WalletError::CurrencyMismatch {
            left: amount.currency().to_string(),
            right: details.currency,
        });
    }
    let trust = get_exchange_trust(state, &exchange_base_url)?;
    if !trust.is_acceptable() && !accept_untrusted {
        return Err(WalletError::ExchangeNotTrusted(exchange_base_url));
    }

    let (reserve_pub, reserve_priv) = state.crypto().create_eddsa_keypair().await?;
    let reserve = ReserveRecord {
        reserve_pub,
        reserve_priv,
        exchange_base_url: exchange_base_url.clone(),
        instructed_amount: amount.clone(),
        status: ReserveStatus::WaitingForFunds,
        created_at: state.clock.now(),
        last_known_balance: None,
        withdrawal_group_ids: Vec::new(),
        bank_base_url,
        bank_credited: false,
        last_error: None,
    };
    run_write(state.db(), &[StoreName::Reserves], |tx| {
        record::insert(tx, &reserve).map_err(WalletError::from)
    })?;
    info!(
        reserve_pub = %reserve_pub,
        exchange = %exchange_base_url,
        amount = %amount,
        trusted = trust.is_trusted,
        "reserve created"
    );
    state.wake();
    Ok(ReserveCreated {
        reserve_pub,
        exchange_base_url,
        amount,
        transaction_id: format!("reserve:{reserve_pub}"),
    })
}

pub async fn withdraw_fakebank(
    state: &InternalWalletState,
    exchange_base_url: &str,
    bank_base_url: &str,
    amount: Amount,
    accept_untrusted: bool,
) -> Result<ReserveCreated, WalletError> {
    create_reserve(state, exchange_base_url, amount, Some(bank_base_url), accept_untrusted).await
}

pub fn get_reserve(
    state: &InternalWalletState,
    reserve_pub: &EddsaPublicKey,
) -> Result<ReserveRecord, WalletError> {
    run_read(state.db(), &[StoreName::Reserves], |tx| {
        record::get::<ReserveRecord, _>(tx, reserve_pub.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("reserve {reserve_pub}")))
    })
}

/// Fund the reserve if a bank was given, query its balance and create a
/// withdrawal group for it.
pub async fn process_reserve(
    state: &InternalWalletState,
    reserve_pub: &EddsaPublicKey,
) -> Result<(), WalletError> {
    let reserve = get_reserve(state, reserve_pub)?;
    if reserve.status != ReserveStatus::WaitingForFunds {
        return Ok(());
    }
    debug!(reserve_pub = %reserve_pub, "processing reserve");

    if let (Some(bank), false) = (&reserve.bank_base_url, reserve.bank_credited) {
        let url = exchange_api::join(bank, "admin/add-incoming")?;
        let body = AddIncomingRequest {
            amount: reserve.instructed_amount.clone(),
            reserve_pub: *reserve_pub,
            debit_account: FAKEBANK_DEBIT_ACCOUNT.to_string(),
        };
        let resp: AddIncomingResponse =
            exchange_api::post_json(state.http.as_ref(), &url, &body).await?;
        run_write(state.db(), &[StoreName::Reserves], |tx| {
            if let Some(mut r) = record::get::<ReserveRecord, _>(&*tx, reserve_pub.as_bytes())? {
                r.bank_credited = true;
                record::put(tx, &r)?;
            }
            Ok::<_, WalletError>(())
        })?;
        info!(reserve_pub = %reserve_pub, row_id = resp.row_id, "bank transfer made");
    }

    let url = exchange_api::join(
        &reserve.exchange_base_url,
        &format!("reserves/{}", reserve_pub.to_crock()),
    )?;
    let status: ReserveStatusResponse = match exchange_api::get_json(state.http.as_ref(), &url).await
    {
        Ok(s) => s,
        Err(WalletError::ProtocolError {
            http_status: 404, ..
        }) => {
            return Err(WalletError::ReserveNotFunded {
                reserve_pub: *reserve_pub,
            })
        }
        Err(e) => return Err(e),
    };
    if status.balance.is_zero() {
        return Err(WalletError::ReserveNotFunded {
            reserve_pub: *reserve_pub,
        });
    }
    state.notify(Notification::ReserveFunded {
        reserve_pub: *reserve_pub,
    });

    let now = state.clock.now();
    let stores = [
        StoreName::Reserves,
        StoreName::Denominations,
        StoreName::WithdrawalGroups,
    ];
    let created = run_write(state.db(), &stores, |tx| {
        let mut reserve = record::get::<ReserveRecord, _>(&*tx, reserve_pub.as_bytes())?
            .ok_or_else(|| WalletError::NotFound(format!("reserve {reserve_pub}")))?;
        if reserve.status != ReserveStatus::WaitingForFunds {
            return Ok(None);
        }
        reserve.last_known_balance = Some(status.balance.clone());
        reserve.last_error = None;

        let denoms: Vec<_> = selectable_denominations(&*tx, &reserve.exchange_base_url, now)?
            .iter()
            .map(|d| d.to_withdrawable())
            .collect();
        let sel = select_withdrawal_denoms(&status.balance, &denoms)?;
        if sel.is_empty() {
            info!(
                reserve_pub = %reserve_pub,
                balance = %status.balance,
                "reserve balance too small for any denomination"
            );
            reserve.status = ReserveStatus::Dormant;
            record::put(tx, &reserve)?;
            return Ok(None);
        }

        let group = WithdrawalGroupRecord {
            withdrawal_group_id: random_id(),
            reserve_pub: *reserve_pub,
            exchange_base_url: reserve.exchange_base_url.clone(),
            secret_seed: random_seed(),
            raw_amount: sel.total_withdraw_cost.clone(),
            effective_amount: sel.total_coin_value.clone(),
            denoms_sel: sel,
            status: WithdrawalStatus::Pending,
            created_at: now,
            finished_at: None,
            last_error: None,
        };
        reserve.status = ReserveStatus::Withdrawing;
        reserve.withdrawal_group_ids.push(group.withdrawal_group_id.clone());
        record::put(tx, &reserve)?;
        record::insert(tx, &group)?;
        Ok::<_, WalletError>(Some(group))
    })?;

    if let Some(group) = created {
        info!(
            reserve_pub = %reserve_pub,
            withdrawal_group_id = %group.withdrawal_group_id,
            coins = group.denoms_sel.coin_count(),
            amount = %group.effective_amount,
            "withdrawal group created"
        );
        state.notify(Notification::WithdrawalGroupCreated {
            withdrawal_group_id: group.withdrawal_group_id,
        });
        state.wake();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::add_exchange;
    use crate::test_support::FakeEnv;
    use taler_nullables::FakeExchangeConfig;

    fn kudos(v: &str) -> Amount {
        Amount::parse(&format!("KUDOS:{v}")).unwrap()
    }

    #[tokio::test]
    async fn untrusted_exchange_needs_confirmation() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        add_exchange(&env.state, "https://exchange.test/").await.unwrap();
        let err = create_reserve(&env.state, "https://exchange.test/", kudos("2"), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::ExchangeNotTrusted(_)));
    }

    #[tokio::test]
    async fn currency_must_match_exchange() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        add_exchange(&env.state, "https://exchange.test/").await.unwrap();
        let err = create_reserve(
            &env.state,
            "https://exchange.test/",
            Amount::parse("EUR:2").unwrap(),
            None,
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WalletError::CurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn unfunded_reserve_is_retried() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        add_exchange(&env.state, "https://exchange.test/").await.unwrap();
        let created = create_reserve(&env.state, "https://exchange.test/", kudos("2"), None, true)
            .await
            .unwrap();
        let err = process_reserve(&env.state, &created.reserve_pub).await.unwrap_err();
        assert!(matches!(err, WalletError::ReserveNotFunded { .. }));
        assert!(err.is_transient());

        env.exchange.credit_reserve(created.reserve_pub, &kudos("2")).unwrap();
        process_reserve(&env.state, &created.reserve_pub).await.unwrap();
        let reserve = get_reserve(&env.state, &created.reserve_pub).unwrap();
        assert_eq!(reserve.status, ReserveStatus::Withdrawing);
        assert_eq!(reserve.withdrawal_group_ids.len(), 1);
    }

    #[tokio::test]
    async fn fakebank_credits_once() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        add_exchange(&env.state, "https://exchange.test/").await.unwrap();
        let created = withdraw_fakebank(
            &env.state,
            "https://exchange.test/",
            "https://bank.test/",
            kudos("3"),
            true,
        )
        .await
        .unwrap();
        process_reserve(&env.state, &created.reserve_pub).await.unwrap();
        process_reserve(&env.state, &created.reserve_pub).await.unwrap();
        assert_eq!(env.exchange.request_count("add-incoming"), 1);
        assert_eq!(env.exchange.reserve_balance(&created.reserve_pub), Some(kudos("3")));
    }
}
