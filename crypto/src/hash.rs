//! SHA-512 hash codes and Blake2b short identifiers.

use blake2::digest::consts::U32;
use blake2::Blake2b;
use rand::RngCore;
use sha2::{Digest, Sha512};
use taler_types::HashCode;

type Blake2b256 = Blake2b<U32>;

/// SHA-512 of arbitrary data.
pub fn sha512(data: &[u8]) -> HashCode {
    sha512_multi(&[data])
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn sha512_multi(parts: &[&[u8]]) -> HashCode {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 64];
    output.copy_from_slice(&hasher.finalize());
    HashCode(output)
}

/// Hash a string including its NUL terminator.
pub fn hash_string(s: &str) -> HashCode {
    sha512_multi(&[s.as_bytes(), &[0u8]])
}

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// A fresh random identifier for local records (Crockford text of 32 random bytes,
/// compressed through Blake2b).
pub fn random_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    taler_types::crock::encode(&blake2b_256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_deterministic() {
        assert_eq!(sha512(b"taler"), sha512(b"taler"));
        assert_ne!(sha512(b"taler"), sha512(b"talers"));
    }

    #[test]
    fn sha512_multi_equivalent() {
        assert_eq!(sha512(b"helloworld"), sha512_multi(&[b"hello", b"world"]));
    }

    #[test]
    fn hash_string_includes_terminator() {
        assert_eq!(hash_string("abc"), sha512(b"abc\0"));
        assert_ne!(hash_string("abc"), sha512(b"abc"));
    }

    #[test]
    fn blake2b_empty() {
        assert_ne!(blake2b_256(b""), [0u8; 32]);
    }

    #[test]
    fn random_ids_differ() {
        let a = random_id();
        assert_eq!(a.len(), 52);
        assert_ne!(a, random_id());
    }
}
