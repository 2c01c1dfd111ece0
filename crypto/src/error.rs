use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid curve point")]
    InvalidPoint,

    #[error("invalid scalar")]
    InvalidScalar,

    #[error("blind signature proof does not verify")]
    InvalidProof,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("malformed input: {0}")]
    Malformed(String),
}
