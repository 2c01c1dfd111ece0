//! The request surface applications use to drive the wallet.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use taler_network::{HttpClient, ReqwestHttpClient, ThrottledHttpClient};
use taler_nullables::MemoryDatabase;
use taler_store::records::{CoinRecord, CoinSource, CoinStatus};
use taler_store::{record, run_read, Database, Migrator, StoreName};
use taler_store_lmdb::LmdbDatabase;
use taler_types::{Amount, Clock, EddsaPublicKey, ErrorDetail, HashCode, SystemClock, Timestamp};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{StorageBackend, WalletConfig};
use crate::crypto_worker::{self, CryptoWorker};
use crate::exchange_api::canonicalize_base_url;
use crate::exchanges::{
    add_exchange, get_exchange, get_exchange_trust, list_exchanges, seed_trust, set_exchange_trust,
    update_exchange,
};
use crate::notifications::Notification;
use crate::operations::balance::get_balances;
use crate::operations::deposit::create_deposit_group;
use crate::operations::pending::get_pending_operations;
use crate::operations::refresh::{force_refresh, refresh_tag};
use crate::operations::reserves::{create_reserve, withdraw_fakebank};
use crate::operations::transactions::{abort_transaction, get_transactions};
use crate::shutdown::ShutdownController;
use crate::state::InternalWalletState;
use crate::tasks::{run_pending, run_until_done};
use crate::WalletError;

/// One wallet operation with its arguments.
///
/// Serialized as `{"operation": "...", "args": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "args")]
pub enum WalletRequest {
    InitWallet,
    AddExchange {
        exchange_base_url: String,
    },
    UpdateExchange {
        exchange_base_url: String,
    },
    ListExchanges,
    GetExchangeTrust {
        exchange_base_url: String,
    },
    SetExchangeTrust {
        exchange_base_url: String,
    },
    WithdrawFakebank {
        exchange_base_url: String,
        bank_base_url: String,
        amount: Amount,
        #[serde(default)]
        accept_untrusted: bool,
    },
    CreateReserve {
        exchange_base_url: String,
        amount: Amount,
        #[serde(default)]
        accept_untrusted: bool,
    },
    CreateDepositGroup {
        amount: Amount,
        deposit_payto_uri: String,
    },
    ForceRefresh {
        coin_pubs: Vec<EddsaPublicKey>,
    },
    GetBalances,
    GetTransactions,
    GetPendingOperations,
    AbortTransaction {
        transaction_id: String,
    },
    RunPending,
    RunUntilDone,
    ListCoins,
}

impl WalletRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            WalletRequest::InitWallet => "InitWallet",
            WalletRequest::AddExchange { .. } => "AddExchange",
            WalletRequest::UpdateExchange { .. } => "UpdateExchange",
            WalletRequest::ListExchanges => "ListExchanges",
            WalletRequest::GetExchangeTrust { .. } => "GetExchangeTrust",
            WalletRequest::SetExchangeTrust { .. } => "SetExchangeTrust",
            WalletRequest::WithdrawFakebank { .. } => "WithdrawFakebank",
            WalletRequest::CreateReserve { .. } => "CreateReserve",
            WalletRequest::CreateDepositGroup { .. } => "CreateDepositGroup",
            WalletRequest::ForceRefresh { .. } => "ForceRefresh",
            WalletRequest::GetBalances => "GetBalances",
            WalletRequest::GetTransactions => "GetTransactions",
            WalletRequest::GetPendingOperations => "GetPendingOperations",
            WalletRequest::AbortTransaction { .. } => "AbortTransaction",
            WalletRequest::RunPending => "RunPending",
            WalletRequest::RunUntilDone => "RunUntilDone",
            WalletRequest::ListCoins => "ListCoins",
        }
    }

    /// Parse an operation name and its JSON arguments. Operations without
    /// arguments accept `null` or `{}`.
    pub fn from_parts(operation: &str, args: Value) -> Result<Self, WalletError> {
        let mut envelope = serde_json::Map::new();
        envelope.insert("operation".into(), Value::String(operation.to_string()));
        let empty = match &args {
            Value::Null => true,
            Value::Object(m) => m.is_empty(),
            _ => false,
        };
        if !empty {
            envelope.insert("args".into(), args);
        }
        serde_json::from_value(Value::Object(envelope))
            .map_err(|e| WalletError::InvalidRequest(format!("{operation}: {e}")))
    }
}

/// Public view of a coin; private keys and blinding secrets stay inside.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoinSummary {
    pub coin_pub: EddsaPublicKey,
    pub exchange_base_url: String,
    pub denom_pub_hash: HashCode,
    pub value: Amount,
    pub status: CoinStatus,
    /// `"withdraw"` or `"refresh"`.
    pub origin: &'static str,
    pub spent_by: Option<String>,
    pub created_at: Timestamp,
}

impl From<CoinRecord> for CoinSummary {
    fn from(c: CoinRecord) -> Self {
        Self {
            origin: match c.source {
                CoinSource::Withdraw { .. } => "withdraw",
                CoinSource::Refresh { .. } => "refresh",
            },
            coin_pub: c.coin_pub,
            exchange_base_url: c.exchange_base_url,
            denom_pub_hash: c.denom_pub_hash,
            value: c.value,
            status: c.status,
            spent_by: c.spent_by,
            created_at: c.created_at,
        }
    }
}

/// A wallet instance: store, HTTP client, crypto worker and task loop.
pub struct Wallet {
    state: InternalWalletState,
    shutdown: ShutdownController,
}

impl Wallet {
    /// Open the wallet described by `config` with the production HTTP
    /// client and the system clock.
    pub fn open(config: WalletConfig) -> Result<Self, WalletError> {
        config.validate()?;
        let db: Arc<dyn Database> = match config.backend {
            StorageBackend::Lmdb => Arc::new(open_lmdb(&config.data_dir, config.lmdb_map_size)?),
            StorageBackend::Memory => Arc::new(MemoryDatabase::new()),
        };
        let client = ReqwestHttpClient::new(Duration::from_secs(config.request_timeout_secs))?;
        let http: Arc<dyn HttpClient> = if config.throttling {
            Arc::new(ThrottledHttpClient::new(client))
        } else {
            Arc::new(client)
        };
        let crypto = crypto_worker::from_config(&config)?;
        info!(
            backend = ?config.backend,
            crypto_worker = ?config.crypto_worker,
            throttling = config.throttling,
            "opening wallet"
        );
        Self::new(db, http, crypto, Arc::new(SystemClock), config)
    }

    /// Assemble a wallet from its parts. Migrates the store and seeds the
    /// configured trust anchors.
    pub fn new(
        db: Arc<dyn Database>,
        http: Arc<dyn HttpClient>,
        crypto: Arc<dyn CryptoWorker>,
        clock: Arc<dyn Clock>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        Migrator::run(db.as_ref())?;
        let state = InternalWalletState::new(db, http, crypto, clock, config);
        seed_trust(&state, &state.config)?;
        Ok(Self {
            state,
            shutdown: ShutdownController::new(),
        })
    }

    pub fn state(&self) -> &InternalWalletState {
        &self.state
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.state.notifier.subscribe()
    }

    /// Run one request. Failures come back in their API form.
    pub async fn handle_request(&self, request: WalletRequest) -> Result<Value, ErrorDetail> {
        let operation = request.operation();
        debug!(operation, "handling request");
        self.dispatch(request).await.map_err(|e| {
            warn!(operation, error = %e, "request failed");
            e.to_detail()
        })
    }

    /// Like [`Wallet::handle_request`], from an operation name and raw
    /// JSON arguments.
    pub async fn handle_json(&self, operation: &str, args: Value) -> Result<Value, ErrorDetail> {
        let request = WalletRequest::from_parts(operation, args).map_err(|e| e.to_detail())?;
        self.handle_request(request).await
    }

    async fn dispatch(&self, request: WalletRequest) -> Result<Value, WalletError> {
        let state = &self.state;
        let value = match request {
            WalletRequest::InitWallet => {
                seed_trust(state, &state.config)?;
                json!({
                    "backend": state.config.backend,
                    "crypto_worker": state.config.crypto_worker,
                    "exchanges": list_exchanges(state)?.len(),
                })
            }
            WalletRequest::AddExchange { exchange_base_url } => {
                serde_json::to_value(add_exchange(state, &exchange_base_url).await?)?
            }
            WalletRequest::UpdateExchange { exchange_base_url } => {
                let base_url = canonicalize_base_url(&exchange_base_url)?;
                get_exchange(state, &base_url)?;
                serde_json::to_value(update_exchange(state, &base_url).await?)?
            }
            WalletRequest::ListExchanges => serde_json::to_value(list_exchanges(state)?)?,
            WalletRequest::GetExchangeTrust { exchange_base_url } => {
                serde_json::to_value(get_exchange_trust(state, &exchange_base_url)?)?
            }
            WalletRequest::SetExchangeTrust { exchange_base_url } => {
                serde_json::to_value(set_exchange_trust(state, &exchange_base_url)?)?
            }
            WalletRequest::WithdrawFakebank {
                exchange_base_url,
                bank_base_url,
                amount,
                accept_untrusted,
            } => serde_json::to_value(
                withdraw_fakebank(
                    state,
                    &exchange_base_url,
                    &bank_base_url,
                    amount,
                    accept_untrusted,
                )
                .await?,
            )?,
            WalletRequest::CreateReserve {
                exchange_base_url,
                amount,
                accept_untrusted,
            } => serde_json::to_value(
                create_reserve(state, &exchange_base_url, amount, None, accept_untrusted).await?,
            )?,
            WalletRequest::CreateDepositGroup {
                amount,
                deposit_payto_uri,
            } => serde_json::to_value(
                create_deposit_group(state, amount, &deposit_payto_uri).await?,
            )?,
            WalletRequest::ForceRefresh { coin_pubs } => {
                let refresh_group_id = force_refresh(state, &coin_pubs)?;
                json!({
                    "transaction_id": refresh_tag(&refresh_group_id),
                    "refresh_group_id": refresh_group_id,
                })
            }
            WalletRequest::GetBalances => json!({ "balances": get_balances(state)? }),
            WalletRequest::GetTransactions => {
                json!({ "transactions": get_transactions(state)? })
            }
            WalletRequest::GetPendingOperations => {
                json!({ "pending_operations": get_pending_operations(state)? })
            }
            WalletRequest::AbortTransaction { transaction_id } => {
                abort_transaction(state, &transaction_id)?;
                json!({})
            }
            WalletRequest::RunPending => json!({ "tasks_run": run_pending(state).await? }),
            WalletRequest::RunUntilDone => {
                run_until_done(state, &self.shutdown).await?;
                json!({})
            }
            WalletRequest::ListCoins => json!({ "coins": self.list_coins()? }),
        };
        Ok(value)
    }

    pub fn list_coins(&self) -> Result<Vec<CoinSummary>, WalletError> {
        run_read(self.state.db(), &[StoreName::Coins], |tx| {
            let coins: Vec<CoinRecord> = record::iter(tx)?;
            Ok(coins.into_iter().map(CoinSummary::from).collect())
        })
    }
}

fn open_lmdb(data_dir: &Path, map_size: usize) -> Result<LmdbDatabase, WalletError> {
    Ok(LmdbDatabase::open(data_dir, map_size)?)
}
