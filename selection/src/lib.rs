//! Coin selection for the Taler wallet.
//!
//! Two problems live here:
//! - **Payment selection**: which owned coins to spend (fully or partially) to
//!   cover a target amount, preferring exact payment, then low fees, then few coins.
//! - **Denomination selection**: which denominations to withdraw (or obtain via
//!   refresh) for a given amount.
//!
//! Everything is a pure function over its inputs; callers persist the outcome.

pub mod candidate;
pub mod error;
pub mod payment;
pub mod subset;
pub mod withdraw;

pub use candidate::{CandidateCoin, CoinSelection, SelectedCoin, WithdrawableDenom};
pub use error::SelectionError;
pub use payment::{select_payment_coins, PaymentTarget};
pub use withdraw::{
    estimate_refresh_output, select_refresh_output, select_withdrawal_denoms, DenomSelection,
    SelectedDenom,
};
