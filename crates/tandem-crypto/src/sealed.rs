//! Sealed boxes: anonymous encryption to an X25519 public key.
//!
//! The sender generates an ephemeral key pair, agrees a shared secret with
//! the recipient's public key and encrypts under a key derived from it. The
//! derivation is bound to both public keys.

use serde::{Deserialize, Serialize};

use crate::crypto::{
    EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey, X25519PublicKey,
    X25519StaticSecret,
};
use crate::error::{CryptoError, Result};

/// Ciphertext only the holder of the recipient secret can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    /// Sender's side of the key agreement.
    pub ephemeral_public: X25519PublicKey,
    pub nonce: EncryptionNonce,
    pub ciphertext: Vec<u8>,
}

fn wrap_key(
    shared: &SharedKey,
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> EncryptionKey {
    let mut context = [0u8; 64];
    context[..32].copy_from_slice(ephemeral.as_bytes());
    context[32..].copy_from_slice(recipient.as_bytes());
    shared.derive_encryption_key(&context)
}

impl SealedBox {
    pub fn seal(plaintext: &[u8], recipient: &X25519PublicKey) -> Result<Self> {
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(recipient);

        let nonce = EncryptionNonce::generate();
        let ciphertext =
            wrap_key(&shared, &ephemeral_public, recipient).encrypt(plaintext, &nonce)?;

        Ok(Self {
            ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    pub fn open(&self, recipient: &X25519StaticSecret) -> Result<Vec<u8>> {
        let shared = recipient.diffie_hellman(&self.ephemeral_public);
        wrap_key(&shared, &self.ephemeral_public, &recipient.public_key())
            .decrypt(&self.ciphertext, &self.nonce)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization into a Vec cannot fail");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CryptoError::SerializationError(e.to_string()))
    }
}
