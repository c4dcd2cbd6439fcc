//! Error types for Tandem Crypto.

use thiserror::Error;

/// Errors raised while encrypting, decrypting or decoding sealed data.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Wrong key, or the ciphertext was tampered with.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
