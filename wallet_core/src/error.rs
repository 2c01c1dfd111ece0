use taler_network::NetworkError as HttpError;
use taler_selection::SelectionError;
use taler_store::StoreError;
use taler_types::{Amount, AmountError, EddsaPublicKey, ErrorDetail, HashCode};
use thiserror::Error;

use crate::crypto_worker::CryptoWorkerError;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("insufficient balance, short by {shortfall}")]
    InsufficientBalance { shortfall: Amount },

    #[error("invalid /keys response: {0}")]
    InvalidKeysResponse(String),

    #[error("exchange answered HTTP {http_status} (code {code}): {hint}")]
    ProtocolError {
        http_status: u16,
        code: u32,
        hint: String,
    },

    #[error("network error: {0}")]
    NetworkError(HttpError),

    #[error("request to {origin} throttled")]
    Throttled { origin: String },

    #[error("operation cancelled: {0}")]
    OperationCancelled(String),

    #[error("denomination {0} expired")]
    DenominationExpired(HashCode),

    #[error("reserve {reserve_pub} is not funded yet")]
    ReserveNotFunded { reserve_pub: EddsaPublicKey },

    #[error("coin {coin_pub} was already spent")]
    DoubleSpendDetected { coin_pub: EddsaPublicKey },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("exchange {0} is not trusted")]
    ExchangeNotTrusted(String),

    #[error("unknown exchange {0}")]
    UnknownExchange(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl WalletError {
    /// Errors worth retrying with backoff. Everything else ends the
    /// operation that hit it.
    pub fn is_transient(&self) -> bool {
        match self {
            WalletError::NetworkError(e) => e.is_transient(),
            WalletError::Throttled { .. } => true,
            WalletError::ReserveNotFunded { .. } => true,
            WalletError::ProtocolError { http_status, .. } => *http_status >= 500,
            WalletError::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }

    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::CurrencyMismatch { .. } => "CurrencyMismatch",
            WalletError::InvalidFormat(_) => "InvalidFormat",
            WalletError::InsufficientBalance { .. } => "InsufficientBalance",
            WalletError::InvalidKeysResponse(_) => "InvalidKeysResponse",
            WalletError::ProtocolError { .. } => "ProtocolError",
            WalletError::NetworkError(_) => "NetworkError",
            WalletError::Throttled { .. } => "Throttled",
            WalletError::OperationCancelled(_) => "OperationCancelled",
            WalletError::DenominationExpired(_) => "DenominationExpired",
            WalletError::ReserveNotFunded { .. } => "ReserveNotFunded",
            WalletError::DoubleSpendDetected { .. } => "DoubleSpendDetected",
            WalletError::Store(_) => "Store",
            WalletError::Crypto(_) => "Crypto",
            WalletError::Config(_) => "Config",
            WalletError::ExchangeNotTrusted(_) => "ExchangeNotTrusted",
            WalletError::UnknownExchange(_) => "UnknownExchange",
            WalletError::NotFound(_) => "NotFound",
            WalletError::InvalidRequest(_) => "InvalidRequest",
        }
    }

    /// The persisted and API-facing form of this error.
    pub fn to_detail(&self) -> ErrorDetail {
        let detail = ErrorDetail::new(self.kind(), self.to_string());
        match self {
            WalletError::ProtocolError {
                http_status, code, ..
            } => detail
                .with_http_status(*http_status)
                .with_details(format!("code {code}")),
            WalletError::InsufficientBalance { shortfall } => {
                detail.with_details(shortfall.to_string())
            }
            _ => detail,
        }
    }
}

impl From<HttpError> for WalletError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Throttled { origin } => WalletError::Throttled { origin },
            other => WalletError::NetworkError(other),
        }
    }
}

impl From<AmountError> for WalletError {
    fn from(e: AmountError) -> Self {
        match e {
            AmountError::CurrencyMismatch { left, right } => {
                WalletError::CurrencyMismatch { left, right }
            }
            AmountError::InvalidFormat(s) => WalletError::InvalidFormat(s),
            other => WalletError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<SelectionError> for WalletError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::InsufficientBalance { shortfall } => {
                WalletError::InsufficientBalance { shortfall }
            }
            SelectionError::Amount(e) => e.into(),
        }
    }
}

impl From<taler_crypto::CryptoError> for WalletError {
    fn from(e: taler_crypto::CryptoError) -> Self {
        WalletError::Crypto(e.to_string())
    }
}

impl From<CryptoWorkerError> for WalletError {
    fn from(e: CryptoWorkerError) -> Self {
        WalletError::Crypto(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::InvalidFormat(e.to_string())
    }
}
