//! Crypto requests, responses and their execution.

use serde::{Deserialize, Serialize};
use taler_crypto::purpose::{self, DenominationValidity, DepositSignInput};
use taler_crypto::{
    create_planchet, denom_pub_hash, derive_refresh_session, derive_withdrawal_secrets,
    eddsa_public_from_private, generate_eddsa_keypair, hash_string, sha512, unblind_and_verify,
    CryptoError,
};
use taler_network::wire::{DenominationInfo, SignKeyInfo};
use taler_types::{
    Amount, BlindedPlanchet, BlindedSignature, BlindingSecret, DenomPublicKey, DenomSignature,
    EcdhePrivateKey, EcdhePublicKey, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, HashCode,
    SecretSeed, Timestamp,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanchetRequest {
    pub secret_seed: SecretSeed,
    pub coin_index: u32,
    pub denom_pub: DenomPublicKey,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub reserve_pub: EddsaPublicKey,
    pub reserve_priv: EddsaPrivateKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanchetResult {
    pub coin_pub: EddsaPublicKey,
    pub coin_priv: EddsaPrivateKey,
    pub blinding_secret: BlindingSecret,
    pub denom_pub_hash: HashCode,
    pub blinded: BlindedPlanchet,
    pub coin_ev_hash: HashCode,
    pub amount_with_fee: Amount,
    /// Reserve signature authorizing the withdrawal of this planchet.
    pub reserve_sig: EddsaSignature,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnblindRequest {
    pub blinded: BlindedPlanchet,
    pub ev_sig: BlindedSignature,
    pub blinding_secret: BlindingSecret,
    pub denom_pub: DenomPublicKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositSignRequest {
    pub coin_priv: EddsaPrivateKey,
    pub contract_terms_hash: HashCode,
    pub wire_hash: HashCode,
    pub denom_pub_hash: HashCode,
    pub timestamp: Timestamp,
    pub refund_deadline: Timestamp,
    pub contribution: Amount,
    pub fee_deposit: Amount,
    pub merchant_pub: EddsaPublicKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshSessionRequest {
    pub session_seed: SecretSeed,
    pub kappa: u32,
    pub old_coin_priv: EddsaPrivateKey,
    /// Value melted, melt fee included.
    pub amount_with_fee: Amount,
    pub fee_refresh: Amount,
    /// One entry per new coin.
    pub new_denoms: Vec<DenomPublicKey>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshPlanchet {
    pub coin_pub: EddsaPublicKey,
    pub coin_priv: EddsaPrivateKey,
    pub blinding_secret: BlindingSecret,
    pub blinded: BlindedPlanchet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshSessionResult {
    pub transfer_pubs: Vec<EcdhePublicKey>,
    pub transfer_privs: Vec<EcdhePrivateKey>,
    /// `planchets[i][j]`: new coin `j` of candidate set `i`.
    pub planchets: Vec<Vec<RefreshPlanchet>>,
    pub rc: HashCode,
    /// The old coin's signature over the melt.
    pub confirm_sig: EddsaSignature,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoupSignRequest {
    pub coin_priv: EddsaPrivateKey,
    pub denom_pub_hash: HashCode,
    pub blinding_secret: BlindingSecret,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenominationCheck {
    pub master_pub: EddsaPublicKey,
    pub denom: DenominationInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeySetCheck {
    pub list_issue_date: Timestamp,
    pub denom_pub_hashes: Vec<HashCode>,
    pub signkey_pub: EddsaPublicKey,
    pub sig: EddsaSignature,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningKeyCheck {
    pub master_pub: EddsaPublicKey,
    pub key: SignKeyInfo,
}

/// Exchange signature over an accepted melt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeltConfirmationCheck {
    pub rc: HashCode,
    pub noreveal_index: u32,
    pub exchange_pub: EddsaPublicKey,
    pub sig: EddsaSignature,
}

/// Exchange signature over an accepted deposit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepositConfirmationCheck {
    pub contract_terms_hash: HashCode,
    pub wire_hash: HashCode,
    pub timestamp: Timestamp,
    pub amount_without_fee: Amount,
    pub coin_pub: EddsaPublicKey,
    pub merchant_pub: EddsaPublicKey,
    pub exchange_pub: EddsaPublicKey,
    pub sig: EddsaSignature,
}

/// A unit of crypto work. Serialized as `{"operation": ..., "args": ...}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "operation", content = "args", rename_all = "camelCase")]
pub enum CryptoRequest {
    CreatePlanchet(PlanchetRequest),
    UnblindAndVerify(UnblindRequest),
    SignDeposit(DepositSignRequest),
    DeriveRefreshSession(RefreshSessionRequest),
    SignRecoup(RecoupSignRequest),
    IsValidDenomination(DenominationCheck),
    IsValidKeySet(KeySetCheck),
    IsValidSigningKey(SigningKeyCheck),
    IsValidMeltConfirmation(MeltConfirmationCheck),
    IsValidDepositConfirmation(DepositConfirmationCheck),
    HashString { value: String },
    CreateEddsaKeypair {},
}

impl CryptoRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            CryptoRequest::CreatePlanchet(_) => "createPlanchet",
            CryptoRequest::UnblindAndVerify(_) => "unblindAndVerify",
            CryptoRequest::SignDeposit(_) => "signDeposit",
            CryptoRequest::DeriveRefreshSession(_) => "deriveRefreshSession",
            CryptoRequest::SignRecoup(_) => "signRecoup",
            CryptoRequest::IsValidDenomination(_) => "isValidDenomination",
            CryptoRequest::IsValidKeySet(_) => "isValidKeySet",
            CryptoRequest::IsValidSigningKey(_) => "isValidSigningKey",
            CryptoRequest::IsValidMeltConfirmation(_) => "isValidMeltConfirmation",
            CryptoRequest::IsValidDepositConfirmation(_) => "isValidDepositConfirmation",
            CryptoRequest::HashString { .. } => "hashString",
            CryptoRequest::CreateEddsaKeypair {} => "createEddsaKeypair",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CryptoResponse {
    Planchet(PlanchetResult),
    DenomSignature(DenomSignature),
    Signature(EddsaSignature),
    RefreshSession(RefreshSessionResult),
    Valid(bool),
    Hash(HashCode),
    Keypair {
        public: EddsaPublicKey,
        private: EddsaPrivateKey,
    },
}

impl CryptoResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            CryptoResponse::Planchet(_) => "planchet",
            CryptoResponse::DenomSignature(_) => "denomSignature",
            CryptoResponse::Signature(_) => "signature",
            CryptoResponse::RefreshSession(_) => "refreshSession",
            CryptoResponse::Valid(_) => "valid",
            CryptoResponse::Hash(_) => "hash",
            CryptoResponse::Keypair { .. } => "keypair",
        }
    }
}

/// Execute one request on the current thread.
pub fn handle_request(request: CryptoRequest) -> Result<CryptoResponse, CryptoError> {
    match request {
        CryptoRequest::CreatePlanchet(r) => create_withdrawal_planchet(&r).map(CryptoResponse::Planchet),
        CryptoRequest::UnblindAndVerify(r) => {
            unblind_and_verify(&r.blinded, &r.ev_sig, &r.blinding_secret, &r.denom_pub)
                .map(CryptoResponse::DenomSignature)
        }
        CryptoRequest::SignDeposit(r) => {
            let sig = purpose::deposit_request(&DepositSignInput {
                contract_terms_hash: &r.contract_terms_hash,
                wire_hash: &r.wire_hash,
                denom_pub_hash: &r.denom_pub_hash,
                timestamp: r.timestamp,
                refund_deadline: r.refund_deadline,
                amount_with_fee: &r.contribution,
                deposit_fee: &r.fee_deposit,
                merchant_pub: &r.merchant_pub,
            })
            .sign(&r.coin_priv);
            Ok(CryptoResponse::Signature(sig))
        }
        CryptoRequest::DeriveRefreshSession(r) => {
            derive_session(&r).map(CryptoResponse::RefreshSession)
        }
        CryptoRequest::SignRecoup(r) => {
            let coin_pub = eddsa_public_from_private(&r.coin_priv);
            let bks_hash = sha512(r.blinding_secret.as_bytes());
            let sig = purpose::recoup_request(&coin_pub, &r.denom_pub_hash, &bks_hash)
                .sign(&r.coin_priv);
            Ok(CryptoResponse::Signature(sig))
        }
        CryptoRequest::IsValidDenomination(c) => {
            let d = &c.denom;
            let hash = denom_pub_hash(&d.denom_pub);
            let valid = purpose::denomination_validity(&DenominationValidity {
                master_pub: &c.master_pub,
                stamp_start: d.stamp_start,
                stamp_expire_withdraw: d.stamp_expire_withdraw,
                stamp_expire_deposit: d.stamp_expire_deposit,
                stamp_expire_legal: d.stamp_expire_legal,
                value: &d.value,
                fee_withdraw: &d.fee_withdraw,
                fee_deposit: &d.fee_deposit,
                fee_refresh: &d.fee_refresh,
                fee_refund: &d.fee_refund,
                denom_pub_hash: &hash,
            })
            .verify(&d.master_sig, &c.master_pub);
            Ok(CryptoResponse::Valid(valid))
        }
        CryptoRequest::IsValidKeySet(c) => {
            let hash = purpose::denominations_hash(&c.denom_pub_hashes);
            let valid = purpose::key_set(c.list_issue_date, &hash).verify(&c.sig, &c.signkey_pub);
            Ok(CryptoResponse::Valid(valid))
        }
        CryptoRequest::IsValidSigningKey(c) => {
            let valid = purpose::signing_key_validity(
                &c.master_pub,
                c.key.stamp_start,
                c.key.stamp_expire,
                &c.key.key,
            )
            .verify(&c.key.master_sig, &c.master_pub);
            Ok(CryptoResponse::Valid(valid))
        }
        CryptoRequest::IsValidMeltConfirmation(c) => {
            let valid =
                purpose::melt_confirmation(&c.rc, c.noreveal_index).verify(&c.sig, &c.exchange_pub);
            Ok(CryptoResponse::Valid(valid))
        }
        CryptoRequest::IsValidDepositConfirmation(c) => {
            let valid = purpose::deposit_confirmation(
                &c.contract_terms_hash,
                &c.wire_hash,
                c.timestamp,
                &c.amount_without_fee,
                &c.coin_pub,
                &c.merchant_pub,
            )
            .verify(&c.sig, &c.exchange_pub);
            Ok(CryptoResponse::Valid(valid))
        }
        CryptoRequest::HashString { value } => Ok(CryptoResponse::Hash(hash_string(&value))),
        CryptoRequest::CreateEddsaKeypair {} => {
            let kp = generate_eddsa_keypair();
            Ok(CryptoResponse::Keypair {
                public: kp.public,
                private: kp.private,
            })
        }
    }
}

fn create_withdrawal_planchet(r: &PlanchetRequest) -> Result<PlanchetResult, CryptoError> {
    let secrets = derive_withdrawal_secrets(r.secret_seed.as_bytes(), r.coin_index);
    let planchet = create_planchet(secrets, &r.denom_pub);
    let amount_with_fee = r
        .value
        .checked_add(&r.fee_withdraw)
        .map_err(|e| CryptoError::Malformed(e.to_string()))?;
    let reserve_sig = purpose::withdraw_request(
        &r.reserve_pub,
        &amount_with_fee,
        &r.fee_withdraw,
        &planchet.denom_pub_hash,
        &planchet.coin_ev_hash,
    )
    .sign(&r.reserve_priv);
    Ok(PlanchetResult {
        coin_pub: planchet.secrets.coin_pub,
        coin_priv: planchet.secrets.coin_priv,
        blinding_secret: planchet.secrets.blinding_secret,
        denom_pub_hash: planchet.denom_pub_hash,
        blinded: planchet.blinded,
        coin_ev_hash: planchet.coin_ev_hash,
        amount_with_fee,
        reserve_sig,
    })
}

fn derive_session(r: &RefreshSessionRequest) -> Result<RefreshSessionResult, CryptoError> {
    let old_coin_pub = eddsa_public_from_private(&r.old_coin_priv);
    let secrets = derive_refresh_session(
        r.session_seed.as_bytes(),
        r.kappa,
        &old_coin_pub,
        &r.amount_with_fee,
        &r.new_denoms,
    )?;
    let confirm_sig = purpose::melt_request(&secrets.rc, &r.amount_with_fee, &r.fee_refresh, &old_coin_pub)
        .sign(&r.old_coin_priv);
    let planchets = secrets
        .planchets
        .into_iter()
        .map(|set| {
            set.into_iter()
                .map(|p| RefreshPlanchet {
                    coin_pub: p.secrets.coin_pub,
                    coin_priv: p.secrets.coin_priv,
                    blinding_secret: p.secrets.blinding_secret,
                    blinded: p.blinded,
                })
                .collect()
        })
        .collect();
    Ok(RefreshSessionResult {
        transfer_pubs: secrets.transfer_pubs,
        transfer_privs: secrets.transfer_privs,
        planchets,
        rc: secrets.rc,
        confirm_sig,
    })
}
