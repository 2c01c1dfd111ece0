//! Protocol operations.
//!
//! Every `process_*` function advances one durable record as far as it can.
//! Each step is committed before the network request that depends on it, so
//! a crash at any point resumes from the last committed status and repeats
//! only idempotent requests.

pub mod balance;
pub mod deposit;
pub mod pending;
pub mod recoup;
pub mod refresh;
pub mod reserves;
pub mod transactions;
pub mod withdraw;

use taler_selection::DenomSelection;
use taler_store::records::{CoinRecord, CoinStatus, DenominationRecord};
use taler_store::{record, ReadTxn, WriteTxn};
use taler_types::EddsaPublicKey;
use tracing::warn;

use crate::exchanges::get_denomination;
use crate::WalletError;

/// One denomination record per coin of `sel`, in selection order.
pub(crate) fn expand_selection<T: ReadTxn + ?Sized>(
    tx: &T,
    base_url: &str,
    sel: &DenomSelection,
) -> Result<Vec<DenominationRecord>, WalletError> {
    let mut out = Vec::with_capacity(sel.coin_count() as usize);
    for s in &sel.selected {
        let denom = get_denomination(tx, base_url, &s.denom_pub_hash)?;
        for _ in 0..s.count {
            out.push(denom.clone());
        }
    }
    Ok(out)
}

pub(crate) fn get_coin<T: ReadTxn + ?Sized>(
    tx: &T,
    coin_pub: &EddsaPublicKey,
) -> Result<CoinRecord, WalletError> {
    record::get::<CoinRecord, _>(tx, coin_pub.as_bytes())?
        .ok_or_else(|| WalletError::NotFound(format!("coin {coin_pub}")))
}

/// The exchange rejected a spend because the coin has no value left.
pub(crate) fn is_double_spend(e: &WalletError) -> bool {
    matches!(e, WalletError::ProtocolError { http_status: 409, .. })
}

/// Record that the exchange considers `coin_pub` spent.
pub(crate) fn mark_forbidden<T: WriteTxn + ?Sized>(
    tx: &mut T,
    coin_pub: &EddsaPublicKey,
) -> Result<(), WalletError> {
    let mut coin = get_coin(&*tx, coin_pub)?;
    warn!(coin_pub = %coin_pub, "exchange reports coin as double spent");
    coin.status = CoinStatus::Forbidden;
    record::put(tx, &coin)?;
    Ok(())
}
