//! Cryptographic primitives for the Taler wallet.
//!
//! - **Ed25519** for reserve, coin, merchant and exchange signatures
//! - **SHA-512** for hash codes, **Blake2b** for short local identifiers
//! - **HKDF-SHA512** for every deterministic key derivation
//! - **X25519** for refresh transfer secrets
//! - **Blind Diffie-Hellman** signatures over Ristretto255 for coins
//! - Canonical JSON hashing for contract terms

pub mod blind;
pub mod canonical_json;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod planchet;
pub mod purpose;
pub mod refresh;
pub mod sign;

pub use blind::{
    blind, denom_keypair_from_seed, denom_pub_hash, generate_denom_keypair, sign_blinded,
    unblind, unblind_and_verify, verify_blinded, verify_denom_signature, DenomKeyPair,
};
pub use canonical_json::{canonicalize, hash_json};
pub use error::CryptoError;
pub use hash::{blake2b_256, hash_string, random_id, sha512, sha512_multi};
pub use kdf::{kdf, kdf32, kdf64};
pub use keys::{
    ecdhe_keypair_from_seed, ecdhe_public_from_private, ed25519_private_to_x25519,
    ed25519_public_to_x25519, eddsa_keypair_from_seed, eddsa_public_from_private,
    generate_ecdhe_keypair, generate_eddsa_keypair, random_seed, EcdheKeyPair, EddsaKeyPair,
};
pub use planchet::{
    coin_ev_hash, create_planchet, derive_refresh_secrets, derive_withdrawal_secrets, wire_hash,
    Planchet, PlanchetSecrets,
};
pub use purpose::SignaturePurpose;
pub use refresh::{
    derive_refresh_planchets, derive_refresh_session, derive_transfer_keypair, refresh_commitment,
    transfer_secret,
    RefreshSessionSecrets,
};
pub use sign::{eddsa_sign, eddsa_verify};
