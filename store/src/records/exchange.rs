use serde::{Deserialize, Serialize};
use taler_types::{EddsaPublicKey, EddsaSignature, ErrorDetail, Timestamp};

use crate::record::Record;
use crate::StoreName;

use super::composite_key;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeUpdateStatus {
    /// Added, `/keys` not fetched yet.
    Initial,
    Ready,
    /// Last update failed; previous details (if any) remain usable.
    Failed,
}

/// An exchange the wallet knows about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub base_url: String,
    pub added_at: Timestamp,
    pub update_status: ExchangeUpdateStatus,
    pub last_update: Option<Timestamp>,
    pub next_update: Timestamp,
    pub master_pub: Option<EddsaPublicKey>,
    pub currency: Option<String>,
    pub last_error: Option<ErrorDetail>,
}

impl Record for ExchangeRecord {
    const STORE: StoreName = StoreName::Exchanges;

    fn key(&self) -> Vec<u8> {
        self.base_url.as_bytes().to_vec()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyInfo {
    pub key: EddsaPublicKey,
    pub stamp_start: Timestamp,
    pub stamp_expire: Timestamp,
    pub master_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorInfo {
    pub auditor_pub: EddsaPublicKey,
    pub auditor_url: String,
}

/// Validated contents of the latest `/keys` response, minus denominations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDetailsRecord {
    pub base_url: String,
    pub currency: String,
    pub master_pub: EddsaPublicKey,
    pub protocol_version: String,
    pub list_issue_date: Timestamp,
    pub signing_keys: Vec<SigningKeyInfo>,
    pub auditors: Vec<AuditorInfo>,
}

impl Record for ExchangeDetailsRecord {
    const STORE: StoreName = StoreName::ExchangeDetails;

    fn key(&self) -> Vec<u8> {
        self.base_url.as_bytes().to_vec()
    }
}

/// An exchange master key the user trusts for a currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTrustRecord {
    pub master_pub: EddsaPublicKey,
    pub currency: String,
    pub exchange_base_url: String,
}

impl ExchangeTrustRecord {
    pub fn key_for(master_pub: &EddsaPublicKey, currency: &str) -> Vec<u8> {
        composite_key(currency, master_pub.as_bytes())
    }
}

impl Record for ExchangeTrustRecord {
    const STORE: StoreName = StoreName::ExchangeTrust;

    fn key(&self) -> Vec<u8> {
        Self::key_for(&self.master_pub, &self.currency)
    }
}

/// An auditor the user trusts for a currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorTrustRecord {
    pub auditor_pub: EddsaPublicKey,
    pub currency: String,
    pub auditor_base_url: String,
}

impl AuditorTrustRecord {
    pub fn key_for(auditor_pub: &EddsaPublicKey, currency: &str) -> Vec<u8> {
        composite_key(currency, auditor_pub.as_bytes())
    }
}

impl Record for AuditorTrustRecord {
    const STORE: StoreName = StoreName::AuditorTrust;

    fn key(&self) -> Vec<u8> {
        Self::key_for(&self.auditor_pub, &self.currency)
    }
}
