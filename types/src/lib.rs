//! Fundamental types for the Taler wallet.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! amounts, timestamps, key and hash newtypes, Crockford base32 encoding, and the
//! persisted error detail.

#[macro_use]
mod macros;

pub mod amount;
pub mod clock;
pub mod crock;
pub mod detail;
pub mod error;
pub mod hash;
pub mod keys;
pub mod time;

pub use amount::{Amount, SaturatedDifference, FRACTIONAL_BASE, FRACTIONAL_DIGITS, MAX_AMOUNT_VALUE};
pub use clock::{Clock, SystemClock};
pub use detail::ErrorDetail;
pub use error::{AmountError, EncodingError};
pub use hash::HashCode;
pub use keys::{
    BlindedPlanchet, BlindedSignature, BlindingSecret, DenomPrivateKey, DenomPublicKey,
    DenomSignature, EcdhePrivateKey, EcdhePublicKey, EddsaPrivateKey, EddsaPublicKey,
    EddsaSignature, SecretSeed,
};
pub use time::Timestamp;
