//! Ed25519 and X25519 key generation.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use taler_types::{EcdhePrivateKey, EcdhePublicKey, EddsaPrivateKey, EddsaPublicKey, SecretSeed};

/// An Ed25519 key pair (public + private).
pub struct EddsaKeyPair {
    pub public: EddsaPublicKey,
    pub private: EddsaPrivateKey,
}

/// An X25519 key pair used for refresh transfer keys.
pub struct EcdheKeyPair {
    pub public: EcdhePublicKey,
    pub private: EcdhePrivateKey,
}

/// Generate a new Ed25519 key pair from a secure random source.
pub fn generate_eddsa_keypair() -> EddsaKeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    EddsaKeyPair {
        public: EddsaPublicKey(signing_key.verifying_key().to_bytes()),
        private: EddsaPrivateKey(signing_key.to_bytes()),
    }
}

/// Derive the public key from a private key.
pub fn eddsa_public_from_private(private: &EddsaPrivateKey) -> EddsaPublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    EddsaPublicKey(signing_key.verifying_key().to_bytes())
}

/// Derive a key pair from a 32-byte seed (deterministic).
pub fn eddsa_keypair_from_seed(seed: &[u8; 32]) -> EddsaKeyPair {
    let private = EddsaPrivateKey(*seed);
    EddsaKeyPair {
        public: eddsa_public_from_private(&private),
        private,
    }
}

/// Generate a new X25519 key pair.
pub fn generate_ecdhe_keypair() -> EcdheKeyPair {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    ecdhe_keypair_from_seed(&seed)
}

pub fn ecdhe_public_from_private(private: &EcdhePrivateKey) -> EcdhePublicKey {
    let secret = x25519_dalek::StaticSecret::from(private.0);
    EcdhePublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes())
}

pub fn ecdhe_keypair_from_seed(seed: &[u8; 32]) -> EcdheKeyPair {
    let private = EcdhePrivateKey(*seed);
    EcdheKeyPair {
        public: ecdhe_public_from_private(&private),
        private,
    }
}

/// 32 fresh random bytes for seeding a family of derived keys.
pub fn random_seed() -> SecretSeed {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    SecretSeed(seed)
}

/// Convert an Ed25519 private key (seed) to X25519 scalar bytes.
///
/// Uses `SigningKey::to_scalar_bytes()` which produces the unclamped
/// scalar suitable for use as an `x25519_dalek::StaticSecret`.
pub fn ed25519_private_to_x25519(ed25519_private: &[u8; 32]) -> [u8; 32] {
    let signing_key = SigningKey::from_bytes(ed25519_private);
    signing_key.to_scalar_bytes()
}

/// Convert an Ed25519 public key to its X25519 (Montgomery) equivalent.
///
/// Returns `None` if the public key bytes are invalid.
pub fn ed25519_public_to_x25519(ed25519_public: &[u8; 32]) -> Option<[u8; 32]> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(ed25519_public).ok()?;
    Some(verifying_key.to_montgomery().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let kp = generate_eddsa_keypair();
        assert_ne!(kp.public.0, [0u8; 32]);
        assert_eq!(eddsa_public_from_private(&kp.private), kp.public);
    }

    #[test]
    fn keypair_from_seed_deterministic() {
        let kp1 = eddsa_keypair_from_seed(&[42u8; 32]);
        let kp2 = eddsa_keypair_from_seed(&[42u8; 32]);
        assert_eq!(kp1.public, kp2.public);
        assert_ne!(kp1.public, eddsa_keypair_from_seed(&[43u8; 32]).public);
    }

    #[test]
    fn ecdhe_keys_agree() {
        let a = generate_ecdhe_keypair();
        let b = generate_ecdhe_keypair();
        let ab = x25519_dalek::StaticSecret::from(a.private.0)
            .diffie_hellman(&x25519_dalek::PublicKey::from(b.public.0));
        let ba = x25519_dalek::StaticSecret::from(b.private.0)
            .diffie_hellman(&x25519_dalek::PublicKey::from(a.public.0));
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn ed25519_to_x25519_keypair_is_consistent() {
        let kp = generate_eddsa_keypair();
        let x25519_secret = ed25519_private_to_x25519(&kp.private.0);
        let x25519_pub_from_ed = ed25519_public_to_x25519(&kp.public.0).unwrap();

        let static_secret = x25519_dalek::StaticSecret::from(x25519_secret);
        let x25519_pub_from_secret = x25519_dalek::PublicKey::from(&static_secret);

        assert_eq!(x25519_pub_from_ed, *x25519_pub_from_secret.as_bytes());
    }

    #[test]
    fn random_seeds_differ() {
        assert_ne!(random_seed().0, random_seed().0);
    }
}
