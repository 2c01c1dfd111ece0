//! HKDF-SHA512 key derivation.

use hkdf::Hkdf;
use sha2::Sha512;

use crate::CryptoError;

/// Derive `out_len` bytes from input keying material, a salt and context info.
pub fn kdf(out_len: usize, ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(okm)
}

pub fn kdf32(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    // 32 bytes is always within the HKDF-SHA512 output limit.
    let _ = hk.expand(info, &mut okm);
    okm
}

pub fn kdf64(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 64] {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = [0u8; 64];
    let _ = hk.expand(info, &mut okm);
    okm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_and_dynamic_agree() {
        let a = kdf(32, b"ikm", b"salt", b"info").unwrap();
        assert_eq!(a.as_slice(), kdf32(b"ikm", b"salt", b"info"));
    }

    #[test]
    fn salt_separates_outputs() {
        assert_ne!(kdf32(b"ikm", b"a", b"info"), kdf32(b"ikm", b"b", b"info"));
        assert_ne!(kdf64(b"ikm", b"a", b"x"), kdf64(b"ikm", b"a", b"y"));
    }

    #[test]
    fn oversized_output_is_error() {
        assert!(kdf(255 * 64 + 1, b"ikm", b"", b"").is_err());
    }
}
