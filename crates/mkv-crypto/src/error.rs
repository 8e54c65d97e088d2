use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("ciphertext too short: {actual} bytes (minimum {minimum})")]
    Truncated { actual: usize, minimum: usize },

    #[error("decryption failed: wrong key or corrupted data")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("invalid KDF parameters: {0}")]
    Kdf(String),
}
