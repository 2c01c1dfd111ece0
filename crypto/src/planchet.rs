//! Planchets: coin key material plus its blinded form, ready to be signed.
//!
//! Coin keys and blinding secrets are derived from a seed and an index, never
//! drawn fresh, so a retried request sends the exact same planchets.

use taler_types::{
    BlindedPlanchet, BlindingSecret, DenomPublicKey, EddsaPrivateKey, EddsaPublicKey, HashCode,
};

use crate::blind::{blind, denom_pub_hash};
use crate::hash::sha512_multi;
use crate::kdf::kdf64;
use crate::keys::eddsa_public_from_private;

/// Private material of one future coin.
#[derive(Clone, Debug)]
pub struct PlanchetSecrets {
    pub coin_priv: EddsaPrivateKey,
    pub coin_pub: EddsaPublicKey,
    pub blinding_secret: BlindingSecret,
}

/// A planchet: secrets plus the blinded coin for one denomination.
#[derive(Clone, Debug)]
pub struct Planchet {
    pub secrets: PlanchetSecrets,
    pub denom_pub_hash: HashCode,
    pub blinded: BlindedPlanchet,
    pub coin_ev_hash: HashCode,
}

fn secrets_from_okm(okm: [u8; 64]) -> PlanchetSecrets {
    let mut priv_bytes = [0u8; 32];
    let mut bks = [0u8; 32];
    priv_bytes.copy_from_slice(&okm[..32]);
    bks.copy_from_slice(&okm[32..]);
    let coin_priv = EddsaPrivateKey(priv_bytes);
    PlanchetSecrets {
        coin_pub: eddsa_public_from_private(&coin_priv),
        coin_priv,
        blinding_secret: BlindingSecret(bks),
    }
}

/// Secrets of coin `coin_index` of a withdrawal group.
pub fn derive_withdrawal_secrets(seed: &[u8; 32], coin_index: u32) -> PlanchetSecrets {
    secrets_from_okm(kdf64(
        seed,
        &coin_index.to_be_bytes(),
        b"taler-withdrawal-coin-derivation",
    ))
}

/// Secrets of new coin `coin_index` produced by a refresh, derived from the
/// transfer secret shared between the wallet and the exchange.
pub fn derive_refresh_secrets(transfer_secret: &HashCode, coin_index: u32) -> PlanchetSecrets {
    secrets_from_okm(kdf64(
        transfer_secret.as_bytes(),
        &coin_index.to_be_bytes(),
        b"taler-coin-derivation",
    ))
}

/// Hash of a blinded planchet as signed by the reserve and committed to in refresh.
pub fn coin_ev_hash(blinded: &BlindedPlanchet, denom_pub_hash: &HashCode) -> HashCode {
    sha512_multi(&[denom_pub_hash.as_bytes(), blinded.as_bytes()])
}

pub fn create_planchet(secrets: PlanchetSecrets, denom_pub: &DenomPublicKey) -> Planchet {
    let denom_pub_hash = denom_pub_hash(denom_pub);
    let blinded = blind(&secrets.coin_pub, &secrets.blinding_secret);
    let coin_ev_hash = coin_ev_hash(&blinded, &denom_pub_hash);
    Planchet {
        secrets,
        denom_pub_hash,
        blinded,
        coin_ev_hash,
    }
}

/// Hash of a merchant's wire account: the payto URI salted through the KDF.
pub fn wire_hash(payto_uri: &str, salt: &[u8]) -> HashCode {
    let mut ikm = payto_uri.as_bytes().to_vec();
    ikm.push(0);
    HashCode(kdf64(&ikm, salt, b"merchant-wire-signature"))
}
