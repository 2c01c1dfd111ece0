//! Wallet state wired to the in-process fake exchange.

use std::sync::Arc;

use taler_nullables::{FakeExchange, FakeExchangeConfig, MemoryDatabase, NullClock};
use taler_store::records::CoinRecord;
use taler_store::{record, run_read, Migrator, StoreName};
use taler_types::Amount;

use crate::config::WalletConfig;
use crate::crypto_worker::InlineWorker;
use crate::exchanges::add_exchange;
use crate::operations::reserves::{create_reserve, get_reserve, process_reserve};
use crate::operations::withdraw::process_withdrawal_group;
use crate::state::InternalWalletState;

pub const EXCHANGE_URL: &str = "https://exchange.test/";

pub struct FakeEnv {
    pub state: InternalWalletState,
    pub clock: Arc<NullClock>,
    pub exchange: Arc<FakeExchange>,
    pub db: Arc<MemoryDatabase>,
}

impl FakeEnv {
    pub fn new(config: FakeExchangeConfig) -> Self {
        let clock = Arc::new(NullClock::new(1_700_000_000));
        let exchange = Arc::new(FakeExchange::new(config, clock.clone()));
        let db = Arc::new(MemoryDatabase::new());
        Migrator::run(db.as_ref()).unwrap();
        let state = InternalWalletState::new(
            db.clone(),
            exchange.clone(),
            Arc::new(InlineWorker),
            clock.clone(),
            WalletConfig::ephemeral(),
        );
        Self {
            state,
            clock,
            exchange,
            db,
        }
    }

    /// Create a funded reserve and process it. Returns the id of the
    /// resulting withdrawal group, still `Pending`.
    pub async fn fund_reserve(&self, amount: &str) -> String {
        let amount = Amount::parse(amount).unwrap();
        add_exchange(&self.state, EXCHANGE_URL).await.unwrap();
        let created = create_reserve(&self.state, EXCHANGE_URL, amount.clone(), None, true)
            .await
            .unwrap();
        self.exchange
            .credit_reserve(created.reserve_pub, &amount)
            .unwrap();
        process_reserve(&self.state, &created.reserve_pub).await.unwrap();
        get_reserve(&self.state, &created.reserve_pub)
            .unwrap()
            .withdrawal_group_ids
            .last()
            .cloned()
            .unwrap()
    }

    /// Withdraw `amount` into fresh coins. Returns the withdrawal group id.
    pub async fn withdraw(&self, amount: &str) -> String {
        let group_id = self.fund_reserve(amount).await;
        process_withdrawal_group(&self.state, &group_id).await.unwrap();
        group_id
    }

    pub fn coins(&self) -> Vec<CoinRecord> {
        run_read(self.state.db(), &[StoreName::Coins], |tx| record::iter(tx)).unwrap()
    }
}
