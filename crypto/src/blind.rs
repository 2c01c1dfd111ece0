//! Blind signatures for coins.
//!
//! Blind Diffie-Hellman key exchange over Ristretto255. A denomination key is a
//! scalar `k` with public point `K = k·G`. A coin public key is hashed to a
//! point `Y`; the wallet blinds it as `B' = Y + r·G`, the exchange answers with
//! `C' = k·B'` plus a Chaum-Pedersen proof that `log_G K == log_B' C'`, and the
//! wallet unblinds `C = C' - r·K = k·Y`. Checking `C` against a coin needs `k`,
//! so only the exchange verifies final denomination signatures; the wallet
//! verifies the proof before it accepts a blinded signature.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use taler_types::{
    BlindedPlanchet, BlindedSignature, BlindingSecret, DenomPrivateKey, DenomPublicKey,
    DenomSignature, EddsaPublicKey, HashCode,
};

use crate::hash::{sha512, sha512_multi};
use crate::kdf::kdf64;
use crate::CryptoError;

const HASH_TO_POINT_DOMAIN: &[u8] = b"taler-coin-hash-to-point";

/// A denomination key pair. Only exchanges hold the private half.
#[derive(Clone)]
pub struct DenomKeyPair {
    pub private: DenomPrivateKey,
    pub public: DenomPublicKey,
}

fn decompress(bytes: &[u8; 32]) -> Result<RistrettoPoint, CryptoError> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(CryptoError::InvalidPoint)
}

fn scalar(bytes: &[u8; 32]) -> Result<Scalar, CryptoError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes)).ok_or(CryptoError::InvalidScalar)
}

fn hash_to_point(coin_pub: &EddsaPublicKey) -> RistrettoPoint {
    let mut input = Vec::with_capacity(HASH_TO_POINT_DOMAIN.len() + 32);
    input.extend_from_slice(HASH_TO_POINT_DOMAIN);
    input.extend_from_slice(coin_pub.as_bytes());
    RistrettoPoint::hash_from_bytes::<Sha512>(&input)
}

fn blinding_factor(secret: &BlindingSecret) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&kdf64(secret.as_bytes(), b"", b"taler-blinding-factor"))
}

fn challenge(
    public: &RistrettoPoint,
    blinded: &RistrettoPoint,
    signed: &RistrettoPoint,
    r1: &RistrettoPoint,
    r2: &RistrettoPoint,
) -> Scalar {
    let h = sha512_multi(&[
        RISTRETTO_BASEPOINT_POINT.compress().as_bytes(),
        public.compress().as_bytes(),
        blinded.compress().as_bytes(),
        signed.compress().as_bytes(),
        r1.compress().as_bytes(),
        r2.compress().as_bytes(),
    ]);
    Scalar::from_bytes_mod_order_wide(&h.0)
}

/// Derive a denomination key pair from seed material (deterministic).
pub fn denom_keypair_from_seed(seed: &[u8]) -> DenomKeyPair {
    let k = Scalar::from_bytes_mod_order_wide(&kdf64(seed, b"", b"taler-denomination-key"));
    DenomKeyPair {
        private: DenomPrivateKey(k.to_bytes()),
        public: DenomPublicKey(RistrettoPoint::mul_base(&k).compress().to_bytes()),
    }
}

pub fn generate_denom_keypair() -> DenomKeyPair {
    let mut seed = [0u8; 64];
    OsRng.fill_bytes(&mut seed);
    denom_keypair_from_seed(&seed)
}

/// Hash identifying a denomination public key.
pub fn denom_pub_hash(denom_pub: &DenomPublicKey) -> HashCode {
    sha512(denom_pub.as_bytes())
}

/// Blind a coin public key for signing under a denomination key.
pub fn blind(coin_pub: &EddsaPublicKey, secret: &BlindingSecret) -> BlindedPlanchet {
    let blinded = hash_to_point(coin_pub) + RistrettoPoint::mul_base(&blinding_factor(secret));
    BlindedPlanchet(blinded.compress().to_bytes())
}

/// Exchange side: sign a blinded planchet and prove the signature was made
/// with the denomination key. Deterministic in its inputs.
pub fn sign_blinded(
    denom_priv: &DenomPrivateKey,
    blinded: &BlindedPlanchet,
) -> Result<BlindedSignature, CryptoError> {
    let k = scalar(denom_priv.as_bytes())?;
    let b = decompress(blinded.as_bytes())?;
    let public = RistrettoPoint::mul_base(&k);
    let signed = k * b;

    let nonce_hash = sha512_multi(&[b"taler-dleq-nonce", denom_priv.as_bytes(), blinded.as_bytes()]);
    let n = Scalar::from_bytes_mod_order_wide(&nonce_hash.0);
    let r1 = RistrettoPoint::mul_base(&n);
    let r2 = n * b;
    let e = challenge(&public, &b, &signed, &r1, &r2);
    let s = n + e * k;

    let mut out = [0u8; 96];
    out[..32].copy_from_slice(signed.compress().as_bytes());
    out[32..64].copy_from_slice(e.as_bytes());
    out[64..].copy_from_slice(s.as_bytes());
    Ok(BlindedSignature(out))
}

/// Check the proof attached to a blinded signature.
pub fn verify_blinded(
    denom_pub: &DenomPublicKey,
    blinded: &BlindedPlanchet,
    sig: &BlindedSignature,
) -> bool {
    let parse = || -> Result<bool, CryptoError> {
        let public = decompress(denom_pub.as_bytes())?;
        let b = decompress(blinded.as_bytes())?;
        let (c, rest) = sig.0.split_at(32);
        let (e, s) = rest.split_at(32);
        let signed = decompress(&to_array(c))?;
        let e = scalar(&to_array(e))?;
        let s = scalar(&to_array(s))?;
        let r1 = RistrettoPoint::mul_base(&s) - e * public;
        let r2 = s * b - e * signed;
        Ok(challenge(&public, &b, &signed, &r1, &r2) == e)
    };
    parse().unwrap_or(false)
}

fn to_array(slice: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(slice);
    out
}

/// Remove the blinding from an exchange signature.
pub fn unblind(
    sig: &BlindedSignature,
    secret: &BlindingSecret,
    denom_pub: &DenomPublicKey,
) -> Result<DenomSignature, CryptoError> {
    let public = decompress(denom_pub.as_bytes())?;
    let signed = decompress(&to_array(&sig.0[..32]))?;
    let unblinded = signed - blinding_factor(secret) * public;
    Ok(DenomSignature(unblinded.compress().to_bytes()))
}

/// Verify the exchange's proof, then unblind. Fails with `InvalidProof` if the
/// signature was not made with `denom_pub` over `blinded`.
pub fn unblind_and_verify(
    blinded: &BlindedPlanchet,
    sig: &BlindedSignature,
    secret: &BlindingSecret,
    denom_pub: &DenomPublicKey,
) -> Result<DenomSignature, CryptoError> {
    if !verify_blinded(denom_pub, blinded, sig) {
        return Err(CryptoError::InvalidProof);
    }
    unblind(sig, secret, denom_pub)
}

/// Exchange side: check an unblinded coin signature.
pub fn verify_denom_signature(
    denom_priv: &DenomPrivateKey,
    coin_pub: &EddsaPublicKey,
    sig: &DenomSignature,
) -> bool {
    let Ok(k) = scalar(denom_priv.as_bytes()) else {
        return false;
    };
    (k * hash_to_point(coin_pub)).compress().to_bytes() == sig.0
}
