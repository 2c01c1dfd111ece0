//! Signature purposes.
//!
//! Every signed message is framed as `size (u32 BE) || purpose (u32 BE) || payload`,
//! where `size` counts the whole frame. The purpose code keeps a signature made
//! for one protocol message from being replayed as another.

use taler_types::{
    Amount, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, HashCode, Timestamp,
};

use crate::hash::sha512_multi;
use crate::sign::{eddsa_sign, eddsa_verify};

pub const MASTER_SIGNING_KEY_VALIDITY: u32 = 1024;
pub const MASTER_DENOMINATION_KEY_VALIDITY: u32 = 1025;
pub const EXCHANGE_CONFIRM_DEPOSIT: u32 = 1033;
pub const EXCHANGE_CONFIRM_MELT: u32 = 1034;
pub const EXCHANGE_KEY_SET: u32 = 1035;
pub const WALLET_RESERVE_WITHDRAW: u32 = 1200;
pub const WALLET_COIN_DEPOSIT: u32 = 1201;
pub const WALLET_COIN_MELT: u32 = 1202;
pub const WALLET_COIN_RECOUP: u32 = 1203;

/// Builder for a framed signature payload.
#[derive(Clone, Debug)]
pub struct SignaturePurpose {
    purpose: u32,
    payload: Vec<u8>,
}

impl SignaturePurpose {
    pub fn new(purpose: u32) -> Self {
        Self {
            purpose,
            payload: Vec::with_capacity(256),
        }
    }

    pub fn purpose(&self) -> u32 {
        self.purpose
    }

    pub fn put(mut self, bytes: &[u8]) -> Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    pub fn put_hash(self, hash: &HashCode) -> Self {
        self.put(hash.as_bytes())
    }

    pub fn put_key(self, key: &EddsaPublicKey) -> Self {
        self.put(key.as_bytes())
    }

    pub fn put_amount(self, amount: &Amount) -> Self {
        self.put(&amount.to_bytes())
    }

    pub fn put_timestamp(self, ts: Timestamp) -> Self {
        self.put(&ts.as_secs().to_be_bytes())
    }

    pub fn put_u32(self, v: u32) -> Self {
        self.put(&v.to_be_bytes())
    }

    /// The complete framed message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = (8 + self.payload.len()) as u32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&self.purpose.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn sign(&self, key: &EddsaPrivateKey) -> EddsaSignature {
        eddsa_sign(&self.to_bytes(), key)
    }

    pub fn verify(&self, sig: &EddsaSignature, key: &EddsaPublicKey) -> bool {
        eddsa_verify(&self.to_bytes(), sig, key)
    }
}

/// Reserve owner's authorization to withdraw one coin.
pub fn withdraw_request(
    reserve_pub: &EddsaPublicKey,
    amount_with_fee: &Amount,
    withdraw_fee: &Amount,
    denom_pub_hash: &HashCode,
    coin_ev_hash: &HashCode,
) -> SignaturePurpose {
    SignaturePurpose::new(WALLET_RESERVE_WITHDRAW)
        .put_key(reserve_pub)
        .put_amount(amount_with_fee)
        .put_amount(withdraw_fee)
        .put_hash(denom_pub_hash)
        .put_hash(coin_ev_hash)
}

/// Inputs of a coin's deposit permission.
pub struct DepositSignInput<'a> {
    pub contract_terms_hash: &'a HashCode,
    pub wire_hash: &'a HashCode,
    pub denom_pub_hash: &'a HashCode,
    pub timestamp: Timestamp,
    pub refund_deadline: Timestamp,
    pub amount_with_fee: &'a Amount,
    pub deposit_fee: &'a Amount,
    pub merchant_pub: &'a EddsaPublicKey,
}

/// Coin owner's permission to deposit (part of) the coin into a contract.
pub fn deposit_request(input: &DepositSignInput<'_>) -> SignaturePurpose {
    SignaturePurpose::new(WALLET_COIN_DEPOSIT)
        .put_hash(input.contract_terms_hash)
        .put_hash(input.wire_hash)
        .put_hash(input.denom_pub_hash)
        .put_timestamp(input.timestamp)
        .put_timestamp(input.refund_deadline)
        .put_amount(input.amount_with_fee)
        .put_amount(input.deposit_fee)
        .put_key(input.merchant_pub)
}

/// Exchange's confirmation of an accepted deposit.
pub fn deposit_confirmation(
    contract_terms_hash: &HashCode,
    wire_hash: &HashCode,
    timestamp: Timestamp,
    amount_without_fee: &Amount,
    coin_pub: &EddsaPublicKey,
    merchant_pub: &EddsaPublicKey,
) -> SignaturePurpose {
    SignaturePurpose::new(EXCHANGE_CONFIRM_DEPOSIT)
        .put_hash(contract_terms_hash)
        .put_hash(wire_hash)
        .put_timestamp(timestamp)
        .put_amount(amount_without_fee)
        .put_key(coin_pub)
        .put_key(merchant_pub)
}

/// Coin owner's request to melt the coin into the session committed to by `rc`.
pub fn melt_request(
    rc: &HashCode,
    amount_with_fee: &Amount,
    melt_fee: &Amount,
    coin_pub: &EddsaPublicKey,
) -> SignaturePurpose {
    SignaturePurpose::new(WALLET_COIN_MELT)
        .put_hash(rc)
        .put_amount(amount_with_fee)
        .put_amount(melt_fee)
        .put_key(coin_pub)
}

/// Exchange's commitment to the index the wallet must not reveal.
pub fn melt_confirmation(rc: &HashCode, noreveal_index: u32) -> SignaturePurpose {
    SignaturePurpose::new(EXCHANGE_CONFIRM_MELT)
        .put_hash(rc)
        .put_u32(noreveal_index)
}

/// Coin owner's request to recoup a coin of a revoked denomination.
pub fn recoup_request(
    coin_pub: &EddsaPublicKey,
    denom_pub_hash: &HashCode,
    blinding_secret_hash: &HashCode,
) -> SignaturePurpose {
    SignaturePurpose::new(WALLET_COIN_RECOUP)
        .put_key(coin_pub)
        .put_hash(denom_pub_hash)
        .put_hash(blinding_secret_hash)
}

/// Everything the exchange master key vouches for about a denomination.
pub struct DenominationValidity<'a> {
    pub master_pub: &'a EddsaPublicKey,
    pub stamp_start: Timestamp,
    pub stamp_expire_withdraw: Timestamp,
    pub stamp_expire_deposit: Timestamp,
    pub stamp_expire_legal: Timestamp,
    pub value: &'a Amount,
    pub fee_withdraw: &'a Amount,
    pub fee_deposit: &'a Amount,
    pub fee_refresh: &'a Amount,
    pub fee_refund: &'a Amount,
    pub denom_pub_hash: &'a HashCode,
}

pub fn denomination_validity(d: &DenominationValidity<'_>) -> SignaturePurpose {
    SignaturePurpose::new(MASTER_DENOMINATION_KEY_VALIDITY)
        .put_key(d.master_pub)
        .put_timestamp(d.stamp_start)
        .put_timestamp(d.stamp_expire_withdraw)
        .put_timestamp(d.stamp_expire_deposit)
        .put_timestamp(d.stamp_expire_legal)
        .put_amount(d.value)
        .put_amount(d.fee_withdraw)
        .put_amount(d.fee_deposit)
        .put_amount(d.fee_refresh)
        .put_amount(d.fee_refund)
        .put_hash(d.denom_pub_hash)
}

/// Master key's endorsement of an online signing key.
pub fn signing_key_validity(
    master_pub: &EddsaPublicKey,
    stamp_start: Timestamp,
    stamp_expire: Timestamp,
    signkey_pub: &EddsaPublicKey,
) -> SignaturePurpose {
    SignaturePurpose::new(MASTER_SIGNING_KEY_VALIDITY)
        .put_key(master_pub)
        .put_timestamp(stamp_start)
        .put_timestamp(stamp_expire)
        .put_key(signkey_pub)
}

/// Hash over a key set's denominations, independent of their listing order.
pub fn denominations_hash(denom_pub_hashes: &[HashCode]) -> HashCode {
    let mut sorted = denom_pub_hashes.to_vec();
    sorted.sort();
    let parts: Vec<&[u8]> = sorted.iter().map(|h| h.as_bytes().as_slice()).collect();
    sha512_multi(&parts)
}

/// Signing key's signature over the whole `/keys` response.
pub fn key_set(list_issue_date: Timestamp, denominations_hash: &HashCode) -> SignaturePurpose {
    SignaturePurpose::new(EXCHANGE_KEY_SET)
        .put_timestamp(list_issue_date)
        .put_hash(denominations_hash)
}
