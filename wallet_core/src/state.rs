//! Shared state handed to every operation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use taler_network::HttpClient;
use tokio::sync::Notify;
use taler_store::Database;
use taler_types::Clock;

use crate::config::WalletConfig;
use crate::crypto_worker::CryptoWorker;
use crate::notifications::{Notification, Notifier};
use crate::retry::RetryPolicy;

/// Everything an operation needs: storage, network, crypto, time and
/// configuration. Cheap to clone.
#[derive(Clone)]
pub struct InternalWalletState {
    pub db: Arc<dyn Database>,
    pub http: Arc<dyn HttpClient>,
    pub crypto: Arc<dyn CryptoWorker>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<WalletConfig>,
    pub notifier: Notifier,
    /// Wakes the task loop when new work was created.
    pub wakeup: Arc<Notify>,
    /// Tags of tasks currently running.
    pub running: Arc<Mutex<HashSet<String>>>,
}

impl InternalWalletState {
    pub fn new(
        db: Arc<dyn Database>,
        http: Arc<dyn HttpClient>,
        crypto: Arc<dyn CryptoWorker>,
        clock: Arc<dyn Clock>,
        config: WalletConfig,
    ) -> Self {
        Self {
            db,
            http,
            crypto,
            clock,
            config: Arc::new(config),
            notifier: Notifier::default(),
            wakeup: Arc::new(Notify::new()),
            running: Arc::default(),
        }
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn crypto(&self) -> &dyn CryptoWorker {
        self.crypto.as_ref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    pub fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    /// Tell the task loop that there is new work.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }
}
