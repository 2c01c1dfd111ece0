//! JSON bodies exchanged with the exchange and the bank.
//!
//! Binary fields travel Crockford base32 encoded; amounts as `CUR:v.f`
//! strings; timestamps as integer seconds.

use serde::{Deserialize, Serialize};
use taler_types::{
    Amount, BlindedPlanchet, BlindedSignature, BlindingSecret, DenomPublicKey, DenomSignature,
    EcdhePrivateKey, EcdhePublicKey, EddsaPublicKey, EddsaSignature, HashCode, Timestamp,
};

/// Response of `GET /keys`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysResponse {
    pub version: String,
    pub currency: String,
    pub master_public_key: EddsaPublicKey,
    pub list_issue_date: Timestamp,
    pub denoms: Vec<DenominationInfo>,
    pub signkeys: Vec<SignKeyInfo>,
    #[serde(default)]
    pub auditors: Vec<AuditorEntry>,
    #[serde(default)]
    pub recoup: Vec<RecoupEntry>,
    /// Signing key that made `eddsa_sig`.
    pub eddsa_pub: EddsaPublicKey,
    /// Signature over the key set.
    pub eddsa_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationInfo {
    pub denom_pub: DenomPublicKey,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub fee_deposit: Amount,
    pub fee_refresh: Amount,
    pub fee_refund: Amount,
    pub stamp_start: Timestamp,
    pub stamp_expire_withdraw: Timestamp,
    pub stamp_expire_deposit: Timestamp,
    pub stamp_expire_legal: Timestamp,
    pub master_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignKeyInfo {
    pub key: EddsaPublicKey,
    pub stamp_start: Timestamp,
    pub stamp_expire: Timestamp,
    pub master_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorEntry {
    pub auditor_pub: EddsaPublicKey,
    pub auditor_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoupEntry {
    pub h_denom_pub: HashCode,
}

/// Error body returned with non-2xx statuses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    #[serde(default)]
    pub hint: String,
}

/// Response of `GET /reserves/{reserve_pub}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStatusResponse {
    pub balance: Amount,
}

/// Body of `POST /reserves/{reserve_pub}/withdraw`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub denom_pub_hash: HashCode,
    pub coin_ev: BlindedPlanchet,
    pub reserve_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub ev_sig: BlindedSignature,
}

/// Body of `POST /coins/{coin_pub}/melt`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltRequest {
    pub denom_pub_hash: HashCode,
    pub denom_sig: DenomSignature,
    pub value_with_fee: Amount,
    pub rc: HashCode,
    pub confirm_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltResponse {
    pub noreveal_index: u32,
    pub exchange_pub: EddsaPublicKey,
    pub exchange_sig: EddsaSignature,
}

/// Body of `POST /coins/{coin_pub}/reveal`.
///
/// `transfer_pubs` holds all `kappa` transfer keys; `transfer_privs` the
/// `kappa - 1` private keys of the revealed sets, in index order with the
/// kept-secret index skipped. `coin_evs` are the planchets of the kept set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevealRequest {
    pub rc: HashCode,
    pub transfer_pubs: Vec<EcdhePublicKey>,
    pub transfer_privs: Vec<EcdhePrivateKey>,
    pub new_denoms_h: Vec<HashCode>,
    pub coin_evs: Vec<BlindedPlanchet>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealResponse {
    pub ev_sigs: Vec<BlindedSignature>,
}

/// Body of `POST /coins/{coin_pub}/deposit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub contribution: Amount,
    pub denom_pub_hash: HashCode,
    pub ub_sig: DenomSignature,
    pub merchant_pub: EddsaPublicKey,
    pub h_contract_terms: HashCode,
    pub h_wire: HashCode,
    pub wire: String,
    pub wire_salt: String,
    pub timestamp: Timestamp,
    pub refund_deadline: Timestamp,
    pub coin_sig: EddsaSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositResponse {
    pub exchange_pub: EddsaPublicKey,
    pub exchange_sig: EddsaSignature,
}

/// Body of `POST /coins/{coin_pub}/recoup`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoupRequest {
    pub denom_pub_hash: HashCode,
    pub denom_sig: DenomSignature,
    pub coin_blind_key_secret: BlindingSecret,
    pub coin_sig: EddsaSignature,
    /// The coin came from a refresh; credit goes to the old coin.
    pub refreshed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoupResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_pub: Option<EddsaPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_coin_pub: Option<EddsaPublicKey>,
}

/// Body of the test bank's `POST /admin/add-incoming`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddIncomingRequest {
    pub amount: Amount,
    pub reserve_pub: EddsaPublicKey,
    pub debit_account: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddIncomingResponse {
    pub row_id: u64,
    pub timestamp: Timestamp,
}

/// Well-known error codes carried in [`ErrorResponse::code`].
pub mod codes {
    pub const RESERVE_INSUFFICIENT_FUNDS: u32 = 1150;
    pub const RESERVE_UNKNOWN: u32 = 1151;
    pub const DENOMINATION_UNKNOWN: u32 = 1152;
    pub const DENOMINATION_EXPIRED: u32 = 1153;
    pub const DENOMINATION_REVOKED: u32 = 1154;
    pub const COIN_SIGNATURE_INVALID: u32 = 1160;
    pub const COIN_INSUFFICIENT_FUNDS: u32 = 1161;
    pub const REFRESH_COMMITMENT_MISMATCH: u32 = 1170;
    pub const REFRESH_SESSION_UNKNOWN: u32 = 1171;
    pub const BAD_REQUEST: u32 = 1000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_fields_are_crockford_strings() {
        let req = WithdrawRequest {
            denom_pub_hash: HashCode([0; 64]),
            coin_ev: BlindedPlanchet([1; 32]),
            reserve_sig: EddsaSignature([2; 64]),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json["coin_ev"].is_string());
        let back: WithdrawRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn recoup_response_omits_absent_fields() {
        let resp = RecoupResponse {
            reserve_pub: Some(EddsaPublicKey([3; 32])),
            old_coin_pub: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("old_coin_pub").is_none());
        let back: RecoupResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn error_response_hint_defaults() {
        let e: ErrorResponse = serde_json::from_str(r#"{"code":1161}"#).unwrap();
        assert_eq!(e.code, codes::COIN_INSUFFICIENT_FUNDS);
        assert!(e.hint.is_empty());
    }
}
