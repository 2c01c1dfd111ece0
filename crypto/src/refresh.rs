//! Refresh session derivation (cut-and-choose).
//!
//! A session melts one old coin into a list of new denominations. The wallet
//! prepares `kappa` candidate sets of new planchets, each set derived from its
//! own transfer key and the old coin's public key, and commits to all of them
//! in `rc`. The exchange picks one set to keep hidden and checks the others.

use sha2::{Digest, Sha512};
use taler_types::{
    Amount, BlindedPlanchet, DenomPublicKey, EcdhePrivateKey, EcdhePublicKey, EddsaPublicKey,
    HashCode,
};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::blind::denom_pub_hash;
use crate::hash::sha512;
use crate::kdf::kdf32;
use crate::keys::{ecdhe_keypair_from_seed, ed25519_public_to_x25519, EcdheKeyPair};
use crate::planchet::{create_planchet, derive_refresh_secrets, Planchet};
use crate::CryptoError;

/// Everything the wallet derives for one refresh session.
#[derive(Clone, Debug)]
pub struct RefreshSessionSecrets {
    pub transfer_privs: Vec<EcdhePrivateKey>,
    pub transfer_pubs: Vec<EcdhePublicKey>,
    /// `planchets[i][j]`: new coin `j` of candidate set `i`.
    pub planchets: Vec<Vec<Planchet>>,
    pub rc: HashCode,
}

pub fn derive_transfer_keypair(session_seed: &[u8; 32], index: u32) -> EcdheKeyPair {
    ecdhe_keypair_from_seed(&kdf32(
        session_seed,
        &index.to_be_bytes(),
        b"taler-transfer-key-derivation",
    ))
}

/// Shared secret between a transfer key and the melted coin.
pub fn transfer_secret(
    transfer_priv: &EcdhePrivateKey,
    coin_pub: &EddsaPublicKey,
) -> Result<HashCode, CryptoError> {
    let coin_x25519 =
        ed25519_public_to_x25519(coin_pub.as_bytes()).ok_or(CryptoError::InvalidPublicKey)?;
    let shared = StaticSecret::from(transfer_priv.0).diffie_hellman(&PublicKey::from(coin_x25519));
    Ok(sha512(shared.as_bytes()))
}

/// The new planchets of one candidate set.
pub fn derive_refresh_planchets(
    transfer_priv: &EcdhePrivateKey,
    old_coin_pub: &EddsaPublicKey,
    new_denoms: &[DenomPublicKey],
) -> Result<Vec<Planchet>, CryptoError> {
    let secret = transfer_secret(transfer_priv, old_coin_pub)?;
    Ok(new_denoms
        .iter()
        .enumerate()
        .map(|(j, denom)| create_planchet(derive_refresh_secrets(&secret, j as u32), denom))
        .collect())
}

/// The refresh commitment over all candidate sets.
pub fn refresh_commitment(
    transfer_pubs: &[EcdhePublicKey],
    coin_evs: &[Vec<BlindedPlanchet>],
    new_denom_hashes: &[HashCode],
    old_coin_pub: &EddsaPublicKey,
    amount_with_fee: &Amount,
) -> HashCode {
    let mut hasher = Sha512::new();
    for (transfer_pub, evs) in transfer_pubs.iter().zip(coin_evs) {
        hasher.update(transfer_pub.as_bytes());
        for ev in evs {
            hasher.update(ev.as_bytes());
        }
    }
    for h in new_denom_hashes {
        hasher.update(h.as_bytes());
    }
    hasher.update(old_coin_pub.as_bytes());
    hasher.update(amount_with_fee.to_bytes());
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    HashCode(out)
}

/// Derive all `kappa` candidate sets and the commitment for a session.
pub fn derive_refresh_session(
    session_seed: &[u8; 32],
    kappa: u32,
    old_coin_pub: &EddsaPublicKey,
    amount_with_fee: &Amount,
    new_denoms: &[DenomPublicKey],
) -> Result<RefreshSessionSecrets, CryptoError> {
    if kappa < 2 {
        return Err(CryptoError::Malformed(format!("kappa {kappa} below 2")));
    }
    let mut transfer_privs = Vec::with_capacity(kappa as usize);
    let mut transfer_pubs = Vec::with_capacity(kappa as usize);
    let mut planchets = Vec::with_capacity(kappa as usize);
    for i in 0..kappa {
        let kp = derive_transfer_keypair(session_seed, i);
        planchets.push(derive_refresh_planchets(&kp.private, old_coin_pub, new_denoms)?);
        transfer_pubs.push(kp.public);
        transfer_privs.push(kp.private);
    }
    let coin_evs: Vec<Vec<BlindedPlanchet>> = planchets
        .iter()
        .map(|set| set.iter().map(|p| p.blinded).collect())
        .collect();
    let denom_hashes: Vec<HashCode> = new_denoms.iter().map(denom_pub_hash).collect();
    let rc = refresh_commitment(
        &transfer_pubs,
        &coin_evs,
        &denom_hashes,
        old_coin_pub,
        amount_with_fee,
    );
    Ok(RefreshSessionSecrets {
        transfer_privs,
        transfer_pubs,
        planchets,
        rc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::denom_keypair_from_seed;
    use crate::keys::generate_eddsa_keypair;

    fn denoms() -> Vec<DenomPublicKey> {
        vec![
            denom_keypair_from_seed(b"two").public,
            denom_keypair_from_seed(b"one").public,
        ]
    }

    #[test]
    fn session_is_deterministic() {
        let coin = generate_eddsa_keypair().public;
        let amount = Amount::parse("EUR:8").unwrap();
        let a = derive_refresh_session(&[9u8; 32], 3, &coin, &amount, &denoms()).unwrap();
        let b = derive_refresh_session(&[9u8; 32], 3, &coin, &amount, &denoms()).unwrap();
        assert_eq!(a.rc, b.rc);
        assert_eq!(a.transfer_pubs, b.transfer_pubs);
        assert_eq!(a.planchets.len(), 3);
        assert_eq!(a.planchets[0].len(), 2);
    }

    #[test]
    fn revealed_sets_can_be_recomputed_from_transfer_keys() {
        let coin = generate_eddsa_keypair().public;
        let amount = Amount::parse("EUR:8").unwrap();
        let session = derive_refresh_session(&[1u8; 32], 3, &coin, &amount, &denoms()).unwrap();

        // What the exchange does at reveal time with noreveal index 1.
        let mut evs: Vec<Vec<BlindedPlanchet>> = Vec::new();
        for i in 0..3 {
            if i == 1 {
                evs.push(session.planchets[1].iter().map(|p| p.blinded).collect());
            } else {
                let set = derive_refresh_planchets(&session.transfer_privs[i], &coin, &denoms()).unwrap();
                evs.push(set.iter().map(|p| p.blinded).collect());
            }
        }
        let hashes: Vec<HashCode> = denoms().iter().map(denom_pub_hash).collect();
        let rc = refresh_commitment(&session.transfer_pubs, &evs, &hashes, &coin, &amount);
        assert_eq!(rc, session.rc);
    }

    #[test]
    fn commitment_binds_amount() {
        let coin = generate_eddsa_keypair().public;
        let a = derive_refresh_session(&[1u8; 32], 3, &coin, &Amount::parse("EUR:8").unwrap(), &denoms()).unwrap();
        let b = derive_refresh_session(&[1u8; 32], 3, &coin, &Amount::parse("EUR:7").unwrap(), &denoms()).unwrap();
        assert_ne!(a.rc, b.rc);
    }

    #[test]
    fn kappa_below_two_rejected() {
        let coin = generate_eddsa_keypair().public;
        let amount = Amount::parse("EUR:1").unwrap();
        assert!(derive_refresh_session(&[0u8; 32], 1, &coin, &amount, &denoms()).is_err());
    }
}
