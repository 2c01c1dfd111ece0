//! Which tasks still have work to do, and when they are due.

use serde::Serialize;
use taler_store::records::{
    DepositGroupRecord, ExchangeRecord, ExchangeUpdateStatus, OperationRetryRecord,
    RecoupGroupRecord, RecoupGroupStatus, RefreshGroupRecord, RefreshGroupStatus, ReserveRecord,
    ReserveStatus, WithdrawalGroupRecord,
};
use taler_store::{record, run_read, ReadTxn, StoreError, StoreName};
use taler_types::ErrorDetail;

use crate::state::InternalWalletState;
use crate::tasks::TaskId;
use crate::WalletError;

/// Stores read when scanning for pending work.
pub const PENDING_STORES: &[StoreName] = &[
    StoreName::Exchanges,
    StoreName::Reserves,
    StoreName::WithdrawalGroups,
    StoreName::RefreshGroups,
    StoreName::DepositGroups,
    StoreName::RecoupGroups,
    StoreName::OperationRetries,
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingTask {
    pub id: TaskId,
    pub tag: String,
    /// Current status of the owning record, for display.
    pub status: String,
    /// The task may run now.
    pub due: bool,
    pub retry_counter: u32,
    pub next_retry_ms: Option<u64>,
    pub last_error: Option<ErrorDetail>,
}

fn task<T: ReadTxn + ?Sized>(
    tx: &T,
    id: TaskId,
    status: String,
    now_ms: u64,
) -> Result<PendingTask, StoreError> {
    let tag = id.tag();
    let retry = record::get::<OperationRetryRecord, _>(tx, tag.as_bytes())?;
    Ok(PendingTask {
        due: retry.as_ref().map_or(true, |r| r.next_retry_ms <= now_ms),
        retry_counter: retry.as_ref().map_or(0, |r| r.retry_counter),
        next_retry_ms: retry.as_ref().map(|r| r.next_retry_ms),
        last_error: retry.and_then(|r| r.last_error),
        id,
        tag,
        status,
    })
}

/// Every task with outstanding work. The transaction must cover
/// [`PENDING_STORES`].
pub fn pending_tasks<T: ReadTxn + ?Sized>(
    tx: &T,
    now_ms: u64,
) -> Result<Vec<PendingTask>, StoreError> {
    let now_secs = now_ms / 1000;
    let mut out = Vec::new();

    for ex in record::iter::<ExchangeRecord, _>(tx)? {
        let stale = ex.next_update.as_secs() <= now_secs;
        if ex.update_status == ExchangeUpdateStatus::Initial || stale {
            let status = format!("{:?}", ex.update_status);
            out.push(task(tx, TaskId::ExchangeUpdate(ex.base_url), status, now_ms)?);
        }
    }
    for r in record::iter::<ReserveRecord, _>(tx)? {
        if r.status == ReserveStatus::WaitingForFunds {
            out.push(task(tx, TaskId::Reserve(r.reserve_pub), format!("{:?}", r.status), now_ms)?);
        }
    }
    for g in record::iter::<WithdrawalGroupRecord, _>(tx)? {
        if !g.status.is_final() {
            let status = format!("{:?}", g.status);
            out.push(task(tx, TaskId::Withdraw(g.withdrawal_group_id), status, now_ms)?);
        }
    }
    for g in record::iter::<RefreshGroupRecord, _>(tx)? {
        if g.status == RefreshGroupStatus::Pending {
            let status = format!("{:?}", g.status);
            out.push(task(tx, TaskId::Refresh(g.refresh_group_id), status, now_ms)?);
        }
    }
    for g in record::iter::<DepositGroupRecord, _>(tx)? {
        if !g.status.is_final() {
            let status = format!("{:?}", g.status);
            out.push(task(tx, TaskId::Deposit(g.deposit_group_id), status, now_ms)?);
        }
    }
    for g in record::iter::<RecoupGroupRecord, _>(tx)? {
        if g.status == RecoupGroupStatus::Pending {
            let status = format!("{:?}", g.status);
            out.push(task(tx, TaskId::Recoup(g.recoup_group_id), status, now_ms)?);
        }
    }
    Ok(out)
}

pub fn get_pending_operations(state: &InternalWalletState) -> Result<Vec<PendingTask>, WalletError> {
    let now_ms = state.clock.now_millis();
    Ok(run_read(state.db(), PENDING_STORES, |tx| pending_tasks(tx, now_ms))?)
}
