//! SHA-512 hash codes.

fixed_bytes!(
    /// A 64-byte SHA-512 digest, the hash type of every signed payload and
    /// denomination key hash.
    HashCode,
    64
);

impl HashCode {
    pub const ZERO: Self = Self([0u8; 64]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }

    /// First eight bytes, handy as a compact log field.
    pub fn short(&self) -> String {
        crate::crock::encode(&self.0[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_zero() {
        assert!(HashCode::ZERO.is_zero());
        assert!(!HashCode([1u8; 64]).is_zero());
    }

    #[test]
    fn short_form_is_prefix() {
        let h = HashCode([0xAB; 64]);
        assert!(h.to_crock().starts_with(&h.short()[..12]));
    }
}
