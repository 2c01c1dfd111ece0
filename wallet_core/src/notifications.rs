//! Wallet state change notifications.

use serde::Serialize;
use taler_types::{EddsaPublicKey, ErrorDetail};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    ExchangeUpdated {
        exchange_base_url: String,
    },
    ReserveFunded {
        reserve_pub: EddsaPublicKey,
    },
    WithdrawalGroupCreated {
        withdrawal_group_id: String,
    },
    WithdrawalGroupFinished {
        withdrawal_group_id: String,
    },
    RefreshMelted {
        refresh_group_id: String,
        coin_pub: EddsaPublicKey,
    },
    RefreshGroupFinished {
        refresh_group_id: String,
    },
    DepositConfirmed {
        deposit_group_id: String,
        coin_pub: EddsaPublicKey,
    },
    DepositGroupFinished {
        deposit_group_id: String,
    },
    RecoupStarted {
        recoup_group_id: String,
    },
    RecoupFinished {
        recoup_group_id: String,
    },
    CoinDoubleSpent {
        coin_pub: EddsaPublicKey,
    },
    BalanceChanged,
    PendingOperationError {
        tag: String,
        error: ErrorDetail,
    },
    OperationFailed {
        tag: String,
        error: ErrorDetail,
    },
}

/// Fan-out of [`Notification`]s to any number of listeners.
///
/// Sending never blocks; slow listeners miss old notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        trace!(?notification, "notify");
        // No listeners is fine.
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listeners_receive_in_order() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();
        notifier.notify(Notification::BalanceChanged);
        notifier.notify(Notification::WithdrawalGroupFinished {
            withdrawal_group_id: "w1".into(),
        });
        assert_eq!(rx.recv().await.unwrap(), Notification::BalanceChanged);
        assert!(matches!(
            rx.recv().await.unwrap(),
            Notification::WithdrawalGroupFinished { .. }
        ));
    }

    #[test]
    fn notify_without_listeners_is_silent() {
        Notifier::new(1).notify(Notification::BalanceChanged);
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Notification::RecoupFinished {
            recoup_group_id: "r".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "recoup-finished");
    }
}
