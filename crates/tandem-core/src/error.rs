//! Error types for Tandem Core.

use thiserror::Error;

/// Errors raised while building, decoding or verifying core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("payload hash mismatch for entry {writer} #{seq}")]
    PayloadHashMismatch { writer: String, seq: u64 },

    #[error("unsupported entry version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    #[error("malformed operation: {0}")]
    MalformedOperation(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
