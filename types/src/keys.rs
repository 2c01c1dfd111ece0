//! Key, signature and blinding material types.
//!
//! Everything here is plain data. Use `taler_crypto` to generate, derive and
//! operate on these values.

fixed_bytes!(
    /// A 32-byte Ed25519 public key (reserve, coin, merchant, exchange master and signing keys).
    EddsaPublicKey,
    32
);

secret_bytes!(
    /// A 32-byte Ed25519 private key seed.
    EddsaPrivateKey,
    32
);

fixed_bytes!(
    /// A 64-byte Ed25519 signature.
    EddsaSignature,
    64
);

fixed_bytes!(
    /// A 32-byte X25519 public key used as a refresh transfer key.
    EcdhePublicKey,
    32
);

secret_bytes!(
    /// A 32-byte X25519 private key used as a refresh transfer key.
    EcdhePrivateKey,
    32
);

fixed_bytes!(
    /// A denomination public key (compressed Ristretto point).
    DenomPublicKey,
    32
);

secret_bytes!(
    /// A denomination private key (Ristretto scalar). Only exchanges hold these.
    DenomPrivateKey,
    32
);

secret_bytes!(
    /// Per-coin blinding factor seed.
    BlindingSecret,
    32
);

secret_bytes!(
    /// A 32-byte secret from which a whole family of keys is derived
    /// (withdrawal groups, refresh sessions).
    SecretSeed,
    32
);

fixed_bytes!(
    /// A blinded coin public key as sent to the exchange for signing.
    BlindedPlanchet,
    32
);

fixed_bytes!(
    /// The exchange's blinded signature together with its proof of correctness:
    /// signature point (32) || challenge (32) || response (32).
    BlindedSignature,
    96
);

fixed_bytes!(
    /// An unblinded denomination signature over a coin public key.
    DenomSignature,
    32
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_json_is_crockford() {
        let key = EddsaPublicKey([1u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_crock()));
        let back: EddsaPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn signature_bincode_is_raw_bytes() {
        let sig = EddsaSignature([9u8; 64]);
        let enc = bincode::serialize(&sig).unwrap();
        // u64 length prefix + 64 raw bytes.
        assert_eq!(enc.len(), 72);
        let back: EddsaSignature = bincode::deserialize(&enc).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = EddsaPrivateKey([5u8; 32]);
        assert_eq!(format!("{secret:?}"), "EddsaPrivateKey(<redacted>)");
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(DenomPublicKey::from_slice(&[0u8; 31]).is_err());
        assert!(DenomPublicKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn wrong_length_crock_rejected() {
        let enc = EddsaPublicKey([3u8; 32]).to_crock();
        assert!(EddsaSignature::from_crock(&enc).is_err());
    }
}
