//! Pairing message types.
//!
//! A candidate never sends its invite token. It announces the token's
//! fingerprint and proves knowledge of the token with a keyed hash over the
//! rest of the request. The member answers with a [`ConfirmPayload`] sealed to
//! the candidate's one-time X25519 key.

use serde::{Deserialize, Serialize};

use tandem_core::{Blake3Hash, InviteRecord, InviteToken, LogKey, WriterKey};
use tandem_crypto::{EncryptionKey, X25519PublicKey};

use crate::error::{Result, SyncError};

/// Current pairing protocol version.
pub const PAIRING_VERSION: u8 = 0;

/// A candidate's request to be admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    pub version: u8,

    /// Fingerprint of the invite token.
    pub fingerprint: Blake3Hash,

    /// The writer key the candidate wants added.
    pub user_data: WriterKey,

    /// Where to seal the confirm.
    pub reply_key: X25519PublicKey,

    /// Keyed hash of `user_data || reply_key` under the token.
    pub proof: Blake3Hash,
}

fn proof_input(user_data: &WriterKey, reply_key: &X25519PublicKey) -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(user_data.as_bytes());
    buf[32..].copy_from_slice(reply_key.as_bytes());
    buf
}

impl PairingRequest {
    pub fn new(token: &InviteToken, user_data: WriterKey, reply_key: X25519PublicKey) -> Self {
        Self {
            version: PAIRING_VERSION,
            fingerprint: token.fingerprint(),
            user_data,
            reply_key,
            proof: token.prove(&proof_input(&user_data, &reply_key)),
        }
    }

    /// Whether this request was made with `record`'s token.
    ///
    /// Expiry is not checked.
    pub fn matches(&self, record: &InviteRecord) -> bool {
        self.fingerprint.ct_eq(&record.token.fingerprint())
    }

    /// Check the request against an invite record.
    pub fn verify(&self, record: &InviteRecord) -> Result<WriterKey> {
        if self.version != PAIRING_VERSION {
            return Err(SyncError::InvalidMessage(format!(
                "unsupported pairing version {}",
                self.version
            )));
        }
        if !self.matches(record) {
            return Err(SyncError::InvalidMessage("invite fingerprint mismatch".into()));
        }
        let expected = record
            .token
            .prove(&proof_input(&self.user_data, &self.reply_key));
        if !expected.ct_eq(&self.proof) {
            return Err(SyncError::InvalidMessage("invalid invite proof".into()));
        }
        Ok(self.user_data)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization into a Vec cannot fail");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }
}

/// What a member hands an admitted candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayload {
    /// The log's root key.
    pub key: LogKey,
    pub encryption_key: EncryptionKey,
}

impl ConfirmPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization into a Vec cannot fail");
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::INVITE_TTL_MS;
    use tandem_crypto::X25519StaticSecret;

    fn request(record: &InviteRecord) -> PairingRequest {
        PairingRequest::new(
            &record.token,
            WriterKey::from_bytes([3; 32]),
            X25519StaticSecret::generate().public_key(),
        )
    }

    #[test]
    fn test_request_verifies_against_its_invite() {
        let record = InviteRecord::generate(0, INVITE_TTL_MS);
        let req = request(&record);
        assert_eq!(req.verify(&record).unwrap(), WriterKey::from_bytes([3; 32]));
    }

    #[test]
    fn test_request_rejected_by_other_invite() {
        let record = InviteRecord::generate(0, INVITE_TTL_MS);
        let other = InviteRecord::generate(0, INVITE_TTL_MS);
        assert!(!request(&record).matches(&other));
        assert!(request(&record).verify(&other).is_err());
    }

    #[test]
    fn test_swapped_user_data_breaks_proof() {
        let record = InviteRecord::generate(0, INVITE_TTL_MS);
        let mut req = request(&record);
        req.user_data = WriterKey::from_bytes([4; 32]);
        assert!(matches!(req.verify(&record), Err(SyncError::InvalidMessage(_))));
    }

    #[test]
    fn test_expired_invite_still_verifies() {
        let record = InviteRecord::generate(0, 1);
        assert!(record.is_expired(10));
        assert!(request(&record).verify(&record).is_ok());
    }

    #[test]
    fn test_wire_encoding() {
        let record = InviteRecord::generate(0, INVITE_TTL_MS);
        let req = request(&record);
        assert_eq!(PairingRequest::from_bytes(&req.to_bytes()).unwrap(), req);

        let confirm = ConfirmPayload {
            key: LogKey::from_bytes([1; 32]),
            encryption_key: EncryptionKey::from_bytes([2; 32]),
        };
        assert_eq!(ConfirmPayload::from_bytes(&confirm.to_bytes()).unwrap(), confirm);
    }
}
