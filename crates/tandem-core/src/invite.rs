//! Invites: the credential a candidate presents to be admitted as a writer.
//!
//! An [`InviteRecord`] lives in the log's view. Its `token` is shared out of
//! band as an [`InviteToken`] in z-base-32. Candidates never send the token
//! itself over the swarm; they send its [`fingerprint`](InviteToken::fingerprint)
//! and a keyed-hash [`proof`](InviteToken::prove) of their request.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::crypto::Blake3Hash;
use crate::error::{CoreError, Result};
use crate::types::{hex32, InviteId};

/// Default lifetime of an invite: 24 hours, in milliseconds.
pub const INVITE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

const FINGERPRINT_CONTEXT: &str = "tandem 2024 invite fingerprint v0";

/// The 256-bit secret of an invite.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InviteToken(pub [u8; 32]);

impl InviteToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The shareable z-base-32 form.
    pub fn encode(&self) -> String {
        z32::encode(&self.0)
    }

    /// Parse the shareable form. Anything that is not exactly 32 bytes of
    /// z-base-32 is rejected.
    pub fn decode(s: &str) -> Result<Self> {
        let bytes = z32::decode(s.trim().as_bytes())
            .map_err(|e| CoreError::InvalidInvite(format!("{:?}", e)))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CoreError::InvalidInvite(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Public identifier of the token, safe to announce.
    pub fn fingerprint(&self) -> Blake3Hash {
        Blake3Hash::from_bytes(blake3::derive_key(FINGERPRINT_CONTEXT, &self.0))
    }

    /// Keyed hash of `data` under the token. Only token holders can produce it.
    pub fn prove(&self, data: &[u8]) -> Blake3Hash {
        Blake3Hash::keyed(&self.0, data)
    }
}

impl fmt::Display for InviteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for InviteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InviteToken({})", &self.fingerprint().to_hex()[..8])
    }
}

impl Serialize for InviteToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        hex32::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for InviteToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        hex32::deserialize(deserializer).map(Self)
    }
}

/// An invite as stored in the view.
///
/// `expires` is advisory: nothing in the apply path or admission rejects an
/// expired record. Only invite creation looks at it, to decide whether an
/// existing record can be handed out again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    pub id: InviteId,
    pub token: InviteToken,
    #[serde(rename = "publicKey", with = "hex32")]
    pub public_key: [u8; 32],
    /// Unix epoch milliseconds.
    pub expires: i64,
}

impl InviteRecord {
    /// Fresh random record expiring `ttl_ms` after `now_ms`.
    pub fn generate(now_ms: i64, ttl_ms: i64) -> Self {
        let mut rng = rand::thread_rng();
        let mut id = [0u8; 32];
        let mut public_key = [0u8; 32];
        rng.fill_bytes(&mut id);
        rng.fill_bytes(&mut public_key);

        Self {
            id: InviteId(id),
            token: InviteToken::generate(),
            public_key,
            expires: now_ms.saturating_add(ttl_ms),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("invite record always serializes to JSON")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| CoreError::DecodingError(e.to_string()))
    }

    /// JSON bytes, as stored in a drive view.
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("invite record always serializes to JSON")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}
