//! Encrypted block envelope.
//!
//! Entry payloads of an encrypted log are stored as the CBOR encoding of an
//! [`EncryptedBlock`]. Peers without the log's key replicate these bytes
//! verbatim.

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptionKey, EncryptionNonce};
use crate::error::{CryptoError, Result};

/// Format identifier for encrypted blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// One encrypted entry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlock {
    pub format: EncryptionFormat,

    /// Fresh per block.
    pub nonce: EncryptionNonce,

    /// Ciphertext including the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlock {
    pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;

        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    pub fn decrypt(&self, key: &EncryptionKey) -> Result<Vec<u8>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ciphertext.len() + 32);
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization into a Vec cannot fail");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    /// Encrypt and encode in one step.
    pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        Ok(Self::encrypt(plaintext, key)?.to_bytes())
    }

    /// Decode and decrypt in one step.
    pub fn open(bytes: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        Self::from_bytes(bytes)?.decrypt(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_open_inverts_seal(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = EncryptionKey::generate();
            let bytes = EncryptedBlock::seal(&plaintext, &key).unwrap();
            prop_assert_eq!(EncryptedBlock::open(&bytes, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_seal_open() {
        let key = EncryptionKey::generate();
        let bytes = EncryptedBlock::seal(b"{\"type\":\"note\"}", &key).unwrap();
        assert_eq!(EncryptedBlock::open(&bytes, &key).unwrap(), b"{\"type\":\"note\"}");
    }

    #[test]
    fn test_wrong_key_fails() {
        let bytes = EncryptedBlock::seal(b"secret", &EncryptionKey::generate()).unwrap();
        assert!(matches!(
            EncryptedBlock::open(&bytes, &EncryptionKey::generate()),
            Err(CryptoError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_nonces_differ_per_block() {
        let key = EncryptionKey::generate();
        let a = EncryptedBlock::encrypt(b"same", &key).unwrap();
        let b = EncryptedBlock::encrypt(b"same", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        assert!(matches!(
            EncryptedBlock::from_bytes(b"\xff\x00"),
            Err(CryptoError::SerializationError(_))
        ));
    }
}
