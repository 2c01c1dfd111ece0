//! Taler wallet command line: runs wallet operations against a local
//! database and hosts the subprocess crypto worker.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;
use taler_types::{Amount, EddsaPublicKey};
use taler_utils::LogFormat;
use taler_wallet_core::config::{CryptoWorkerKind, StorageBackend};
use taler_wallet_core::crypto_worker::envelope;
use taler_wallet_core::{Wallet, WalletConfig, WalletRequest};

#[derive(Parser)]
#[command(name = "taler-wallet-cli", about = "Taler wallet command line")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base;
    /// flags and env vars override them.
    #[arg(long, env = "TALER_WALLET_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of the wallet database.
    #[arg(long, env = "TALER_WALLET_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Storage backend: "lmdb" or "memory".
    #[arg(long, env = "TALER_WALLET_BACKEND", value_parser = parse_backend)]
    backend: Option<StorageBackend>,

    /// Crypto worker: "inline", "pool" or "subprocess".
    #[arg(long, env = "TALER_WALLET_CRYPTO_WORKER", value_parser = parse_worker)]
    crypto_worker: Option<CryptoWorkerKind>,

    /// Do not rate-limit requests to exchanges and banks.
    #[arg(long, env = "TALER_WALLET_NO_THROTTLE")]
    no_throttle: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TALER_WALLET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TALER_WALLET_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Create or open the wallet and seed configured trust anchors.
    Init,
    /// Register an exchange and download its keys.
    AddExchange { url: String },
    /// Download the keys of a known exchange again.
    UpdateExchange { url: String },
    /// List known exchanges.
    Exchanges,
    /// Show whether an exchange is trusted or audited.
    ExchangeTrust { url: String },
    /// Trust the current master key of an exchange.
    TrustExchange { url: String },
    /// Withdraw from an exchange, funded by a test bank.
    WithdrawFakebank {
        #[arg(long)]
        exchange: String,
        #[arg(long)]
        bank: String,
        #[arg(long)]
        amount: Amount,
        /// Accept an exchange that is neither trusted nor audited.
        #[arg(long)]
        accept_untrusted: bool,
        /// Return once the reserve is created instead of running it.
        #[arg(long)]
        no_run: bool,
    },
    /// Create a reserve to be funded by a wire transfer.
    CreateReserve {
        #[arg(long)]
        exchange: String,
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        accept_untrusted: bool,
    },
    /// Deposit coins into a bank account.
    Deposit {
        #[arg(long)]
        amount: Amount,
        /// Target account, e.g. `payto://x-taler-bank/bank.test/alice`.
        #[arg(long)]
        payto: String,
        #[arg(long)]
        no_run: bool,
    },
    /// Refresh the given coins.
    Refresh {
        #[arg(required = true)]
        coin_pubs: Vec<EddsaPublicKey>,
    },
    /// Show balances per currency.
    Balance,
    /// Show the transaction history.
    Transactions,
    /// Show operations with outstanding work.
    Pending,
    /// Cancel a transaction.
    Abort { transaction_id: String },
    /// Run every due operation once.
    RunPending,
    /// Run until nothing is pending (or SIGINT/SIGTERM).
    RunUntilDone,
    /// List the wallet's coins.
    Coins,
    /// Run a raw request, e.g. `api GetBalances` or
    /// `api AddExchange '{"exchange_base_url": "..."}'`.
    Api {
        operation: String,
        args: Option<String>,
    },
    /// Print the effective configuration as TOML.
    PrintConfig,
    /// Serve crypto requests as line-delimited JSON over stdio.
    CryptoWorker,
}

fn parse_backend(s: &str) -> Result<StorageBackend, String> {
    match s.to_ascii_lowercase().as_str() {
        "lmdb" => Ok(StorageBackend::Lmdb),
        "memory" => Ok(StorageBackend::Memory),
        other => Err(format!("unknown backend {other:?}")),
    }
}

fn parse_worker(s: &str) -> Result<CryptoWorkerKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "inline" => Ok(CryptoWorkerKind::Inline),
        "pool" => Ok(CryptoWorkerKind::Pool),
        "subprocess" => Ok(CryptoWorkerKind::Subprocess),
        other => Err(format!("unknown crypto worker {other:?}")),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<WalletConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            WalletConfig::from_toml_file(path_str)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => WalletConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(worker) = cli.crypto_worker {
        config.crypto_worker = worker;
    }
    if cli.no_throttle {
        config.throttling = false;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.validate()?;
    Ok(config)
}

fn request_for(command: Command) -> anyhow::Result<Vec<WalletRequest>> {
    let then_run = |request: WalletRequest, no_run: bool| {
        if no_run {
            vec![request]
        } else {
            vec![request, WalletRequest::RunUntilDone]
        }
    };
    Ok(match command {
        Command::Init => vec![WalletRequest::InitWallet],
        Command::AddExchange { url } => vec![WalletRequest::AddExchange {
            exchange_base_url: url,
        }],
        Command::UpdateExchange { url } => vec![WalletRequest::UpdateExchange {
            exchange_base_url: url,
        }],
        Command::Exchanges => vec![WalletRequest::ListExchanges],
        Command::ExchangeTrust { url } => vec![WalletRequest::GetExchangeTrust {
            exchange_base_url: url,
        }],
        Command::TrustExchange { url } => vec![WalletRequest::SetExchangeTrust {
            exchange_base_url: url,
        }],
        Command::WithdrawFakebank {
            exchange,
            bank,
            amount,
            accept_untrusted,
            no_run,
        } => then_run(
            WalletRequest::WithdrawFakebank {
                exchange_base_url: exchange,
                bank_base_url: bank,
                amount,
                accept_untrusted,
            },
            no_run,
        ),
        Command::CreateReserve {
            exchange,
            amount,
            accept_untrusted,
        } => vec![WalletRequest::CreateReserve {
            exchange_base_url: exchange,
            amount,
            accept_untrusted,
        }],
        Command::Deposit {
            amount,
            payto,
            no_run,
        } => then_run(
            WalletRequest::CreateDepositGroup {
                amount,
                deposit_payto_uri: payto,
            },
            no_run,
        ),
        Command::Refresh { coin_pubs } => then_run(WalletRequest::ForceRefresh { coin_pubs }, false),
        Command::Balance => vec![WalletRequest::GetBalances],
        Command::Transactions => vec![WalletRequest::GetTransactions],
        Command::Pending => vec![WalletRequest::GetPendingOperations],
        Command::Abort { transaction_id } => vec![WalletRequest::AbortTransaction { transaction_id }],
        Command::RunPending => vec![WalletRequest::RunPending],
        Command::RunUntilDone => vec![WalletRequest::RunUntilDone],
        Command::Coins => vec![WalletRequest::ListCoins],
        Command::Api { operation, args } => {
            let args: Value = match args {
                Some(raw) => serde_json::from_str(&raw).context("args must be JSON")?,
                None => Value::Null,
            };
            vec![WalletRequest::from_parts(&operation, args)?]
        }
        Command::PrintConfig | Command::CryptoWorker => Vec::new(),
    })
}

async fn run_request(wallet: &Wallet, request: WalletRequest) -> anyhow::Result<Value> {
    let is_loop = request == WalletRequest::RunUntilDone;
    let run = wallet.handle_request(request);
    tokio::pin!(run);
    let result = if is_loop {
        let finished = tokio::select! {
            r = &mut run => Some(r),
            _ = wallet.shutdown_controller().wait_for_signal() => None,
        };
        // The loop stops at its next check; let the current round finish.
        match finished {
            Some(r) => r,
            None => run.await,
        }
    } else {
        run.await
    };
    match result {
        Ok(value) => Ok(value),
        Err(detail) => {
            eprintln!("{}", serde_json::to_string_pretty(&detail)?);
            bail!("{detail}")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    taler_utils::init_logging(config.log_format, &config.log_level);

    match cli.command {
        Command::CryptoWorker => {
            tracing::debug!("serving crypto requests on stdio");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            envelope::serve(stdin, tokio::io::stdout()).await?;
            return Ok(());
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
        _ => {}
    }

    let requests = request_for(cli.command)?;
    let wallet = Wallet::open(config).context("opening wallet")?;
    let mut last = Value::Null;
    for request in requests {
        let is_loop = request == WalletRequest::RunUntilDone;
        let value = run_request(&wallet, request).await?;
        if !is_loop || last.is_null() {
            last = value;
        }
    }
    println!("{}", serde_json::to_string_pretty(&last)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_defaults() {
        let cli = Cli::parse_from([
            "taler-wallet-cli",
            "--backend",
            "memory",
            "--crypto-worker",
            "inline",
            "--no-throttle",
            "balance",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.crypto_worker, CryptoWorkerKind::Inline);
        assert!(!config.throttling);
    }

    #[test]
    fn withdraw_runs_the_task_loop_unless_asked_not_to() {
        let cli = Cli::parse_from([
            "taler-wallet-cli",
            "withdraw-fakebank",
            "--exchange",
            "https://exchange.test/",
            "--bank",
            "https://bank.test/",
            "--amount",
            "KUDOS:5",
        ]);
        let requests = request_for(cli.command).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], WalletRequest::RunUntilDone);

        let cli = Cli::parse_from([
            "taler-wallet-cli",
            "deposit",
            "--amount",
            "KUDOS:1",
            "--payto",
            "payto://x",
            "--no-run",
        ]);
        assert_eq!(request_for(cli.command).unwrap().len(), 1);
    }

    #[test]
    fn raw_api_requests_are_parsed() {
        let cli = Cli::parse_from([
            "taler-wallet-cli",
            "api",
            "AbortTransaction",
            r#"{"transaction_id": "deposit:x"}"#,
        ]);
        assert_eq!(
            request_for(cli.command).unwrap(),
            vec![WalletRequest::AbortTransaction {
                transaction_id: "deposit:x".into()
            }]
        );
    }
}
