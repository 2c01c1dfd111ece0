use taler_types::{Amount, AmountError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("insufficient balance, short by {shortfall}")]
    InsufficientBalance { shortfall: Amount },

    #[error("amount error: {0}")]
    Amount(#[from] AmountError),
}
