//! Ed25519 message signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use taler_types::{EddsaPrivateKey, EddsaPublicKey, EddsaSignature};

/// Sign a message with a private key, returning the signature.
pub fn eddsa_sign(message: &[u8], private_key: &EddsaPrivateKey) -> EddsaSignature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    EddsaSignature(signing_key.sign(message).to_bytes())
}

/// Verify a signature against a message and public key.
///
/// Returns `true` if the signature is valid, `false` otherwise.
pub fn eddsa_verify(message: &[u8], signature: &EddsaSignature, public_key: &EddsaPublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &dalek_sig).is_ok()
}
