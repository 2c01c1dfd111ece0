//! Taler wallet core.
//!
//! Keeps the wallet's coins, reserves and in-flight protocol operations in a
//! transactional store and drives them against exchanges:
//! - exchange `/keys` ingestion and trust (the denomination registry)
//! - withdrawal from reserves, funded by a test bank or by wire transfer
//! - deposits, with refresh of partially spent coins
//! - refresh (melt + reveal) and recoup of revoked denominations
//! - a retrying task loop with persisted backoff
//!
//! Applications talk to [`Wallet`] through [`WalletRequest`]s; progress is
//! reported as [`Notification`]s.

pub mod api;
pub mod config;
pub mod crypto_worker;
pub mod error;
pub mod exchange_api;
pub mod exchanges;
pub mod notifications;
pub mod operations;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use api::{CoinSummary, Wallet, WalletRequest};
pub use config::WalletConfig;
pub use error::WalletError;
pub use notifications::Notification;
pub use shutdown::ShutdownController;
pub use state::InternalWalletState;
