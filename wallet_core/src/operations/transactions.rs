//! Transaction history: one entry per withdrawal, refresh, deposit and
//! recoup, newest last.

use serde::Serialize;
use taler_store::records::{
    CoinRecord, DepositGroupRecord, DepositStatus, RecoupGroupRecord, RecoupGroupStatus,
    RefreshGroupRecord, RefreshGroupStatus, WithdrawalGroupRecord, WithdrawalStatus,
};
use taler_store::{record, run_read, ReadTxn, StoreName};
use taler_types::{Amount, ErrorDetail, Timestamp};

use crate::operations::deposit::{abort_deposit, deposit_tag};
use crate::operations::refresh::{abort_refresh, refresh_tag};
use crate::operations::withdraw::abort_withdrawal;
use crate::state::InternalWalletState;
use crate::tasks::TaskId;
use crate::WalletError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    Withdrawal,
    Refresh,
    Deposit,
    Recoup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionState {
    Pending,
    Done,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transaction {
    /// Same as the tag of the task that drives it.
    pub transaction_id: String,
    pub kind: TransactionKind,
    pub state: TransactionState,
    pub exchange_base_url: Option<String>,
    /// Amount before fees.
    pub amount_raw: Option<Amount>,
    /// Amount the wallet's balance changes by.
    pub amount_effective: Option<Amount>,
    pub timestamp: Timestamp,
    pub last_error: Option<ErrorDetail>,
}

fn withdrawal_state(s: WithdrawalStatus) -> TransactionState {
    match s {
        WithdrawalStatus::Done => TransactionState::Done,
        WithdrawalStatus::Failed => TransactionState::Failed,
        WithdrawalStatus::Cancelled => TransactionState::Cancelled,
        _ => TransactionState::Pending,
    }
}

fn refresh_state(s: RefreshGroupStatus) -> TransactionState {
    match s {
        RefreshGroupStatus::Pending => TransactionState::Pending,
        RefreshGroupStatus::Done => TransactionState::Done,
        RefreshGroupStatus::Failed => TransactionState::Failed,
        RefreshGroupStatus::Cancelled => TransactionState::Cancelled,
    }
}

fn deposit_state(s: DepositStatus) -> TransactionState {
    match s {
        DepositStatus::Confirmed => TransactionState::Done,
        DepositStatus::Failed => TransactionState::Failed,
        DepositStatus::Cancelled => TransactionState::Cancelled,
        _ => TransactionState::Pending,
    }
}

pub fn list_transactions<T: ReadTxn + ?Sized>(tx: &T) -> Result<Vec<Transaction>, WalletError> {
    let mut out = Vec::new();

    for g in record::iter::<WithdrawalGroupRecord, _>(tx)? {
        out.push(Transaction {
            transaction_id: TaskId::Withdraw(g.withdrawal_group_id).tag(),
            kind: TransactionKind::Withdrawal,
            state: withdrawal_state(g.status),
            exchange_base_url: Some(g.exchange_base_url),
            amount_raw: Some(g.raw_amount),
            amount_effective: Some(g.effective_amount),
            timestamp: g.created_at,
            last_error: g.last_error,
        });
    }

    for g in record::iter::<RefreshGroupRecord, _>(tx)? {
        let mut melted = Amount::zero(&g.currency)?;
        for c in &g.coins {
            melted = melted.checked_add(&c.amount_melt)?;
        }
        out.push(Transaction {
            transaction_id: refresh_tag(&g.refresh_group_id),
            kind: TransactionKind::Refresh,
            state: refresh_state(g.status),
            exchange_base_url: None,
            amount_raw: Some(melted),
            amount_effective: Some(g.estimated_output),
            timestamp: g.created_at,
            last_error: g.last_error,
        });
    }

    for g in record::iter::<DepositGroupRecord, _>(tx)? {
        out.push(Transaction {
            transaction_id: deposit_tag(&g.deposit_group_id),
            kind: TransactionKind::Deposit,
            state: deposit_state(g.status),
            exchange_base_url: g.coins.first().map(|c| c.exchange_base_url.clone()),
            amount_raw: Some(g.amount),
            amount_effective: Some(g.effective_amount),
            timestamp: g.timestamp,
            last_error: g.last_error,
        });
    }

    for g in record::iter::<RecoupGroupRecord, _>(tx)? {
        let mut amount: Option<Amount> = None;
        for rc in &g.coins {
            if let Some(coin) = record::get::<CoinRecord, _>(tx, rc.coin_pub.as_bytes())? {
                amount = Some(match amount {
                    Some(a) => a.checked_add(&coin.value)?,
                    None => coin.value,
                });
            }
        }
        out.push(Transaction {
            transaction_id: TaskId::Recoup(g.recoup_group_id).tag(),
            kind: TransactionKind::Recoup,
            state: match g.status {
                RecoupGroupStatus::Pending => TransactionState::Pending,
                RecoupGroupStatus::Done => TransactionState::Done,
            },
            exchange_base_url: Some(g.exchange_base_url),
            amount_raw: amount.clone(),
            amount_effective: amount,
            timestamp: g.created_at,
            last_error: g.last_error,
        });
    }

    out.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    Ok(out)
}

pub fn get_transactions(state: &InternalWalletState) -> Result<Vec<Transaction>, WalletError> {
    let stores = [
        StoreName::WithdrawalGroups,
        StoreName::RefreshGroups,
        StoreName::DepositGroups,
        StoreName::RecoupGroups,
        StoreName::Coins,
    ];
    run_read(state.db(), &stores, |tx| list_transactions(tx))
}

/// Cancel the operation behind `transaction_id`.
pub fn abort_transaction(state: &InternalWalletState, transaction_id: &str) -> Result<(), WalletError> {
    match TaskId::parse(transaction_id)? {
        TaskId::Withdraw(id) => abort_withdrawal(state, &id),
        TaskId::Refresh(id) => abort_refresh(state, &id),
        TaskId::Deposit(id) => abort_deposit(state, &id),
        TaskId::Recoup(_) => Err(WalletError::InvalidRequest(
            "recoup cannot be cancelled".into(),
        )),
        TaskId::Reserve(_) | TaskId::ExchangeUpdate(_) => Err(WalletError::InvalidRequest(format!(
            "{transaction_id} is not a transaction"
        ))),
    }
}
