//! # Tandem Crypto
//!
//! Confidentiality for Tandem logs.
//!
//! ## Encryption Model
//!
//! Every log has one symmetric [`EncryptionKey`] (ChaCha20-Poly1305). Writers
//! seal each entry payload into an [`EncryptedBlock`] under that key, so peers
//! can store and replicate feeds they cannot read.
//!
//! A new writer learns the log key and encryption key during pairing. The
//! member seals them to the candidate's X25519 key in a [`SealedBox`]; only
//! the candidate holding the matching [`X25519StaticSecret`] can open it.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod sealed;

pub use crypto::{
    EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey, X25519PublicKey,
    X25519StaticSecret,
};
pub use envelope::{EncryptedBlock, EncryptionFormat};
pub use error::{CryptoError, Result};
pub use sealed::SealedBox;
