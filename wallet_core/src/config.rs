//! Wallet configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use taler_store_lmdb::DEFAULT_MAP_SIZE;
use taler_types::EddsaPublicKey;
use taler_utils::LogFormat;

use crate::retry::RetryPolicy;
use crate::WalletError;

/// Where the wallet keeps its database.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Lmdb,
    /// Nothing survives the process. Useful for throwaway wallets.
    Memory,
}

/// How crypto requests are executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoWorkerKind {
    /// On the calling task.
    Inline,
    /// On a rayon thread pool.
    #[default]
    Pool,
    /// In a child process speaking line-delimited JSON.
    Subprocess,
}

/// An exchange trusted without asking, for one currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedExchange {
    pub base_url: String,
    pub master_pub: EddsaPublicKey,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedAuditor {
    pub auditor_url: String,
    pub auditor_pub: EddsaPublicKey,
    pub currency: String,
}

/// Configuration for a wallet instance.
///
/// Can be loaded from a TOML file via [`WalletConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Directory of the LMDB database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub backend: StorageBackend,

    /// LMDB memory map size in bytes.
    #[serde(default = "default_lmdb_map_size")]
    pub lmdb_map_size: usize,

    #[serde(default)]
    pub crypto_worker: CryptoWorkerKind,

    /// Threads of the pooled crypto worker.
    #[serde(default = "default_crypto_threads")]
    pub crypto_threads: usize,

    /// Executable started by the subprocess worker. Defaults to the running
    /// binary.
    #[serde(default)]
    pub crypto_worker_program: Option<PathBuf>,

    /// Whether to rate-limit requests per origin.
    #[serde(default = "default_true")]
    pub throttling: bool,

    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    #[serde(default = "default_backoff_delta_ms")]
    pub backoff_delta_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Relative jitter applied to every retry delay, in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Cut-and-choose parameter for refresh sessions.
    #[serde(default = "default_refresh_kappa")]
    pub refresh_kappa: u32,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub trusted_exchanges: Vec<TrustedExchange>,

    #[serde(default)]
    pub trusted_auditors: Vec<TrustedAuditor>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./taler_wallet_data")
}

fn default_lmdb_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

fn default_crypto_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_true() -> bool {
    true
}

fn default_backoff_base() -> f64 {
    1.5
}

fn default_backoff_delta_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    120_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_refresh_kappa() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl WalletConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, WalletError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| WalletError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, WalletError> {
        let config: Self = toml::from_str(s).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, WalletError> {
        toml::to_string_pretty(self).map_err(|e| WalletError::Config(e.to_string()))
    }

    /// An in-memory wallet with inline crypto; what tests want.
    pub fn ephemeral() -> Self {
        Self {
            backend: StorageBackend::Memory,
            crypto_worker: CryptoWorkerKind::Inline,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.refresh_kappa < 2 {
            return Err(WalletError::Config(format!(
                "refresh_kappa must be at least 2, got {}",
                self.refresh_kappa
            )));
        }
        if self.backoff_base < 1.0 {
            return Err(WalletError::Config(format!(
                "backoff_base must be at least 1, got {}",
                self.backoff_base
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(WalletError::Config(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        if self.crypto_threads == 0 {
            return Err(WalletError::Config("crypto_threads must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: self.backoff_base,
            delta_ms: self.backoff_delta_ms,
            max_ms: self.max_backoff_ms,
            jitter: self.jitter,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: StorageBackend::default(),
            lmdb_map_size: default_lmdb_map_size(),
            crypto_worker: CryptoWorkerKind::default(),
            crypto_threads: default_crypto_threads(),
            crypto_worker_program: None,
            throttling: default_true(),
            backoff_base: default_backoff_base(),
            backoff_delta_ms: default_backoff_delta_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh_kappa: default_refresh_kappa(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            trusted_exchanges: Vec::new(),
            trusted_auditors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = WalletConfig::default();
        let toml_str = config.to_toml_string().expect("serializable");
        let parsed = WalletConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = WalletConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.backend, StorageBackend::Lmdb);
        assert_eq!(config.crypto_worker, CryptoWorkerKind::Pool);
        assert_eq!(config.refresh_kappa, 3);
        assert_eq!(config.backoff_delta_ms, 1_000);
        assert_eq!(config.max_backoff_ms, 120_000);
        assert_eq!(config.log_format, LogFormat::Human);
        assert!(config.throttling);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            backend = "memory"
            crypto_worker = "inline"
            refresh_kappa = 4

            [[trusted_exchanges]]
            base_url = "https://exchange.test/"
            master_pub = "0000000000000000000000000000000000000000000000000000"
            currency = "KUDOS"
        "#;
        let config = WalletConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.crypto_worker, CryptoWorkerKind::Inline);
        assert_eq!(config.refresh_kappa, 4);
        assert_eq!(config.trusted_exchanges.len(), 1);
        assert_eq!(config.trusted_exchanges[0].currency, "KUDOS");
        assert_eq!(config.log_level, "info"); // default
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            WalletConfig::from_toml_str("refresh_kappa = 1"),
            Err(WalletError::Config(_))
        ));
        assert!(matches!(
            WalletConfig::from_toml_str("jitter = 1.5"),
            Err(WalletError::Config(_))
        ));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = WalletConfig::from_toml_file("/nonexistent/taler-wallet.toml");
        assert!(matches!(result, Err(WalletError::Config(_))));
    }
}
