//! The task loop.
//!
//! A task is one durable record with outstanding work, named by a tag such
//! as `withdraw:<id>`. Running a task advances its record as far as
//! possible. Transient failures are scheduled for retry with exponential
//! backoff; anything else marks the record failed.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use taler_store::records::{
    DepositGroupRecord, ExchangeRecord, RefreshGroupRecord, RefreshGroupStatus, ReserveRecord,
    ReserveStatus, WithdrawalGroupRecord, WithdrawalStatus,
};
use taler_store::{record, run_read, run_write, StoreName, WriteTxn};
use taler_types::{EddsaPublicKey, ErrorDetail};
use tracing::{debug, error, info, warn};

use crate::exchanges::{update_exchange, EXCHANGE_UPDATE_INTERVAL_SECS};
use crate::notifications::Notification;
use crate::operations::deposit::{deposit_tag, process_deposit_group};
use crate::operations::pending::{pending_tasks, PENDING_STORES};
use crate::operations::recoup::process_recoup_group;
use crate::operations::refresh::{process_refresh_group, refresh_tag};
use crate::operations::reserves::process_reserve;
use crate::operations::withdraw::process_withdrawal_group;
use crate::retry::{record_failure, reset_retry};
use crate::shutdown::ShutdownController;
use crate::state::InternalWalletState;
use crate::WalletError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "kebab-case")]
pub enum TaskId {
    ExchangeUpdate(String),
    Reserve(EddsaPublicKey),
    Withdraw(String),
    Refresh(String),
    Deposit(String),
    Recoup(String),
}

impl TaskId {
    pub fn tag(&self) -> String {
        match self {
            TaskId::ExchangeUpdate(url) => format!("exchange-update:{url}"),
            TaskId::Reserve(reserve_pub) => format!("reserve:{reserve_pub}"),
            TaskId::Withdraw(id) => format!("withdraw:{id}"),
            TaskId::Refresh(id) => refresh_tag(id),
            TaskId::Deposit(id) => deposit_tag(id),
            TaskId::Recoup(id) => format!("recoup:{id}"),
        }
    }

    pub fn parse(tag: &str) -> Result<Self, WalletError> {
        let invalid = || WalletError::InvalidRequest(format!("unknown transaction id {tag}"));
        let (kind, rest) = tag.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        let rest = rest.to_string();
        Ok(match kind {
            "exchange-update" => TaskId::ExchangeUpdate(rest),
            "reserve" => TaskId::Reserve(
                EddsaPublicKey::from_crock(&rest).map_err(|e| WalletError::InvalidFormat(e.to_string()))?,
            ),
            "withdraw" => TaskId::Withdraw(rest),
            "refresh" => TaskId::Refresh(rest),
            "deposit" => TaskId::Deposit(rest),
            "recoup" => TaskId::Recoup(rest),
            _ => return Err(invalid()),
        })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// What happened to a task in one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskOutcome {
    Finished,
    Retrying,
    Failed,
    /// Another caller is running the same task.
    Busy,
}

struct RunningGuard<'a> {
    state: &'a InternalWalletState,
    tag: String,
}

impl<'a> RunningGuard<'a> {
    fn claim(state: &'a InternalWalletState, tag: String) -> Option<Self> {
        let mut running = state.running.lock().unwrap_or_else(|p| p.into_inner());
        running.insert(tag.clone()).then(|| Self { state, tag })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.state.running.lock().unwrap_or_else(|p| p.into_inner());
        running.remove(&self.tag);
    }
}

async fn dispatch(state: &InternalWalletState, id: &TaskId) -> Result<(), WalletError> {
    match id {
        TaskId::ExchangeUpdate(url) => update_exchange(state, url).await.map(|_| ()),
        TaskId::Reserve(reserve_pub) => process_reserve(state, reserve_pub).await,
        TaskId::Withdraw(id) => process_withdrawal_group(state, id).await,
        TaskId::Refresh(id) => process_refresh_group(state, id).await,
        TaskId::Deposit(id) => process_deposit_group(state, id).await,
        TaskId::Recoup(id) => process_recoup_group(state, id).await,
    }
}

/// Errors that end an operation unless the operation must not be abandoned.
fn should_retry(state: &InternalWalletState, id: &TaskId, e: &WalletError) -> bool {
    if e.is_transient() {
        return true;
    }
    match id {
        TaskId::Recoup(_) => true,
        TaskId::Refresh(refresh_group_id) => run_read(state.db(), &[StoreName::RefreshGroups], |tx| {
            record::get::<RefreshGroupRecord, _>(tx, refresh_group_id.as_bytes())
        })
        .ok()
        .flatten()
        .is_some_and(|g| g.has_confirmed_melt()),
        _ => false,
    }
}

/// Run one task and record its outcome.
pub async fn run_task(state: &InternalWalletState, id: &TaskId) -> Result<TaskOutcome, WalletError> {
    let tag = id.tag();
    let Some(_guard) = RunningGuard::claim(state, tag.clone()) else {
        debug!(task = %tag, "task already running");
        return Ok(TaskOutcome::Busy);
    };
    debug!(task = %tag, "running task");

    let err = match dispatch(state, id).await {
        Ok(()) => {
            run_write(state.db(), &[StoreName::OperationRetries], |tx| reset_retry(tx, &tag))?;
            return Ok(TaskOutcome::Finished);
        }
        Err(e) => e,
    };
    let detail = err.to_detail();

    if should_retry(state, id, &err) {
        let now_ms = state.clock.now_millis();
        let policy = state.retry_policy();
        let retry = run_write(state.db(), &[StoreName::OperationRetries], |tx| {
            record_failure(tx, &tag, detail.clone(), &policy, now_ms)
        })?;
        warn!(
            task = %tag,
            retry_counter = retry.retry_counter,
            retry_in_ms = retry.next_retry_ms.saturating_sub(now_ms),
            error = %err,
            "task failed, will retry"
        );
        state.notify(Notification::PendingOperationError { tag, error: detail });
        return Ok(TaskOutcome::Retrying);
    }

    error!(task = %tag, error = %err, "task failed");
    fail_task(state, id, detail.clone())?;
    state.notify(Notification::OperationFailed { tag, error: detail });
    Ok(TaskOutcome::Failed)
}

/// Persist a terminal failure on the task's record and drop its backoff state.
fn fail_task(state: &InternalWalletState, id: &TaskId, detail: ErrorDetail) -> Result<(), WalletError> {
    let now = state.clock.now();
    let tag = id.tag();
    let stores = [
        StoreName::Exchanges,
        StoreName::Reserves,
        StoreName::WithdrawalGroups,
        StoreName::RefreshGroups,
        StoreName::DepositGroups,
        StoreName::Coins,
        StoreName::OperationRetries,
    ];
    run_write(state.db(), &stores, |tx| {
        match id {
            TaskId::ExchangeUpdate(url) => {
                if let Some(mut ex) = record::get::<ExchangeRecord, _>(&*tx, url.as_bytes())? {
                    ex.next_update = now.add_secs(EXCHANGE_UPDATE_INTERVAL_SECS);
                    ex.last_error = Some(detail);
                    record::put(tx, &ex)?;
                }
            }
            TaskId::Reserve(reserve_pub) => {
                fail_reserve(tx, reserve_pub, detail)?;
            }
            TaskId::Withdraw(id) => {
                if let Some(mut g) = record::get::<WithdrawalGroupRecord, _>(&*tx, id.as_bytes())? {
                    if !g.status.is_final() {
                        g.status = WithdrawalStatus::Failed;
                        g.finished_at = Some(now);
                        g.last_error = Some(detail.clone());
                        record::put(tx, &g)?;
                        fail_reserve(tx, &g.reserve_pub, detail)?;
                    }
                }
            }
            TaskId::Refresh(id) => {
                if let Some(mut g) = record::get::<RefreshGroupRecord, _>(&*tx, id.as_bytes())? {
                    if g.status == RefreshGroupStatus::Pending {
                        g.status = RefreshGroupStatus::Failed;
                        g.finished_at = Some(now);
                        g.last_error = Some(detail);
                        record::put(tx, &g)?;
                    }
                }
            }
            TaskId::Deposit(id) => {
                if let Some(mut g) = record::get::<DepositGroupRecord, _>(&*tx, id.as_bytes())? {
                    if !g.status.is_final() {
                        g.status = taler_store::records::DepositStatus::Failed;
                        g.finished_at = Some(now);
                        g.last_error = Some(detail);
                        release_undeposited(tx, &g, &tag)?;
                        record::put(tx, &g)?;
                    }
                }
            }
            TaskId::Recoup(_) => {}
        }
        reset_retry(tx, &tag)?;
        Ok::<_, WalletError>(())
    })
}

fn fail_reserve<T: WriteTxn + ?Sized>(
    tx: &mut T,
    reserve_pub: &EddsaPublicKey,
    detail: ErrorDetail,
) -> Result<(), WalletError> {
    if let Some(mut r) = record::get::<ReserveRecord, _>(&*tx, reserve_pub.as_bytes())? {
        if matches!(r.status, ReserveStatus::WaitingForFunds | ReserveStatus::Withdrawing) {
            r.status = ReserveStatus::Failed;
            r.last_error = Some(detail);
            record::put(tx, &r)?;
        }
    }
    Ok(())
}

/// Coins of a failed deposit that never reached the exchange are spendable
/// again, unless the exchange reported them spent.
fn release_undeposited<T: WriteTxn + ?Sized>(
    tx: &mut T,
    group: &DepositGroupRecord,
    tag: &str,
) -> Result<(), WalletError> {
    for dc in group.coins.iter().filter(|c| !c.deposited) {
        if let Some(mut coin) =
            record::get::<taler_store::records::CoinRecord, _>(&*tx, dc.coin_pub.as_bytes())?
        {
            if coin.is_fresh() && coin.spent_by.as_deref() == Some(tag) {
                coin.spent_by = None;
                record::put(tx, &coin)?;
            }
        }
    }
    Ok(())
}

/// Run every due task once, different tasks concurrently. Returns the
/// number of tasks run.
pub async fn run_pending(state: &InternalWalletState) -> Result<usize, WalletError> {
    let now_ms = state.clock.now_millis();
    let tasks = run_read(state.db(), PENDING_STORES, |tx| pending_tasks(tx, now_ms))?;
    let mut seen = HashSet::new();
    let due: Vec<TaskId> = tasks
        .into_iter()
        .filter(|t| t.due && seen.insert(t.tag.clone()))
        .map(|t| t.id)
        .collect();
    if due.is_empty() {
        return Ok(0);
    }
    debug!(tasks = due.len(), "running due tasks");
    let results = join_all(due.iter().map(|id| run_task(state, id))).await;
    for (id, result) in due.iter().zip(results) {
        if let Err(e) = result {
            error!(task = %id, error = %e, "could not record task outcome");
        }
    }
    Ok(due.len())
}

/// Run tasks until none is pending, sleeping until the earliest retry when
/// nothing is due. Stops early on shutdown.
pub async fn run_until_done(
    state: &InternalWalletState,
    shutdown: &ShutdownController,
) -> Result<(), WalletError> {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        if shutdown.is_shutdown() {
            info!("task loop stopped by shutdown");
            return Ok(());
        }
        let now_ms = state.clock.now_millis();
        let tasks = run_read(state.db(), PENDING_STORES, |tx| pending_tasks(tx, now_ms))?;
        if tasks.is_empty() {
            info!("no pending operations left");
            return Ok(());
        }
        if tasks.iter().any(|t| t.due) {
            run_pending(state).await?;
            continue;
        }

        let wait_ms = tasks
            .iter()
            .filter_map(|t| t.next_retry_ms)
            .min()
            .map_or(0, |next| next.saturating_sub(now_ms))
            .max(1);
        debug!(
            pending = tasks.len(),
            wait = %taler_utils::format_millis(wait_ms),
            "waiting for next retry"
        );
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
            _ = state.wakeup.notified() => {}
            _ = shutdown_rx.recv() => {
                info!("task loop stopped by shutdown");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::pending::get_pending_operations;
    use crate::operations::reserves::withdraw_fakebank;
    use crate::test_support::FakeEnv;
    use taler_nullables::FakeExchangeConfig;
    use taler_store::records::OperationRetryRecord;
    use taler_types::Amount;

    #[test]
    fn tags_round_trip() {
        let ids = [
            TaskId::ExchangeUpdate("https://exchange.test/".into()),
            TaskId::Reserve(EddsaPublicKey([7; 32])),
            TaskId::Withdraw("W1".into()),
            TaskId::Refresh("R1".into()),
            TaskId::Deposit("D1".into()),
            TaskId::Recoup("C1".into()),
        ];
        for id in ids {
            assert_eq!(TaskId::parse(&id.tag()).unwrap(), id);
        }
        assert!(TaskId::parse("withdraw:").is_err());
        assert!(TaskId::parse("nonsense").is_err());
    }

    #[tokio::test]
    async fn fakebank_withdrawal_runs_to_completion() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["8", "2", "1"]).unwrap());
        withdraw_fakebank(
            &env.state,
            "https://exchange.test/",
            "https://bank.test/",
            Amount::parse("KUDOS:11").unwrap(),
            true,
        )
        .await
        .unwrap();
        run_until_done(&env.state, &ShutdownController::new()).await.unwrap();
        assert_eq!(env.coins().len(), 3);
        assert!(get_pending_operations(&env.state).unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_schedules_retry() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        let group_id = env.fund_reserve("KUDOS:1").await;
        env.exchange.inject_error("/withdraw", 503);
        let outcome = run_task(&env.state, &TaskId::Withdraw(group_id.clone())).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Retrying);

        let retry = run_read(env.state.db(), &[StoreName::OperationRetries], |tx| {
            record::get::<OperationRetryRecord, _>(tx, format!("withdraw:{group_id}").as_bytes())
        })
        .unwrap()
        .unwrap();
        assert_eq!(retry.retry_counter, 1);
        assert_eq!(run_pending(&env.state).await.unwrap(), 0);

        env.clock.advance(5);
        assert_eq!(run_pending(&env.state).await.unwrap(), 1);
        assert_eq!(env.coins().len(), 1);
        assert!(get_pending_operations(&env.state).unwrap().is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_marks_withdrawal_failed() {
        let env = FakeEnv::new(FakeExchangeConfig::with_values("KUDOS", &["1"]).unwrap());
        let group_id = env.fund_reserve("KUDOS:1").await;
        env.exchange.inject_error("/withdraw", 409);
        let mut rx = env.state.notifier.subscribe();
        let outcome = run_task(&env.state, &TaskId::Withdraw(group_id.clone())).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Failed);

        let group = crate::operations::withdraw::get_withdrawal_group(&env.state, &group_id).unwrap();
        assert_eq!(group.status, WithdrawalStatus::Failed);
        let error = group.last_error.unwrap();
        assert_eq!(error.kind, "ProtocolError");
        assert_eq!(error.http_status, Some(409));

        let mut failed = false;
        while let Ok(n) = rx.try_recv() {
            failed |= matches!(n, Notification::OperationFailed { .. });
        }
        assert!(failed);
        assert!(get_pending_operations(&env.state).unwrap().is_empty());
    }
}
