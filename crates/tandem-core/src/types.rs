//! Strong type definitions for Tandem.
//!
//! All identifiers are 32-byte newtypes so a log key can never be passed
//! where a writer key is expected. In human-readable encodings (JSON) they
//! serialize as lowercase hex; in binary encodings as raw bytes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut arr = [0u8; 32];
                hex::decode_to_slice(s, &mut arr)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 32] = slice.try_into()?;
                Ok(Self(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                hex32::serialize(&self.0, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                hex32::deserialize(deserializer).map(Self)
            }
        }
    };
}

key_type! {
    /// Identity of a shared log.
    ///
    /// A freshly created log takes its creator's writer key as its log key;
    /// that writer is the bootstrap member of the writer set.
    LogKey
}

key_type! {
    /// Swarm topic under which replicas of a log find each other.
    ///
    /// Derived from the log key so that the topic can be announced publicly
    /// without revealing the key itself.
    DiscoveryKey
}

key_type! {
    /// Ed25519 public key of a (potential) writer.
    WriterKey
}

key_type! {
    /// Identity of a peer on the swarm.
    PeerId
}

key_type! {
    /// Content address of an entry: Blake3 of its canonical bytes.
    EntryId
}

key_type! {
    /// Random identifier of an invite record.
    InviteId
}

impl DiscoveryKey {
    /// Derive the discovery topic for a log.
    pub fn derive(log: &LogKey) -> Self {
        Self(blake3::derive_key("tandem 2024 discovery key v0", &log.0))
    }
}

impl From<WriterKey> for LogKey {
    fn from(key: WriterKey) -> Self {
        Self(key.0)
    }
}

impl From<LogKey> for WriterKey {
    fn from(key: LogKey) -> Self {
        Self(key.0)
    }
}

/// Serde helpers for 32-byte arrays: hex when human-readable, bytes otherwise.
pub mod hex32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            bytes.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let mut arr = [0u8; 32];
            hex::decode_to_slice(&s, &mut arr).map_err(serde::de::Error::custom)?;
            Ok(arr)
        } else {
            <[u8; 32]>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_key_hex_roundtrip() {
        let key = WriterKey::from_bytes([0x42; 32]);
        let recovered = WriterKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, recovered);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(LogKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_display_and_debug() {
        let key = LogKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", key), "abababababababab");
        assert!(format!("{:?}", key).starts_with("LogKey("));
    }

    #[test]
    fn test_json_uses_hex() {
        let key = WriterKey::from_bytes([0x01; 32]);
        let json = serde_json::to_value(key).unwrap();
        assert_eq!(json, serde_json::Value::String("01".repeat(32)));

        let back: WriterKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_discovery_key_is_stable_and_distinct() {
        let log = LogKey::from_bytes([0x07; 32]);
        let d1 = DiscoveryKey::derive(&log);
        let d2 = DiscoveryKey::derive(&log);
        assert_eq!(d1, d2);
        assert_ne!(d1.as_bytes(), log.as_bytes());
    }
}
