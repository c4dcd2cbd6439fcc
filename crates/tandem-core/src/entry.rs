//! Entry: one signed block in a writer's feed.
//!
//! Each writer owns a feed of entries numbered from 1. An entry is immutable
//! once signed. The payload is opaque at this layer (it is ciphertext when the
//! log is encrypted).

use bytes::Bytes;

use crate::canonical::{canonical_bytes, signed_message};
use crate::crypto::{Blake3Hash, Keypair, Signature};
use crate::error::CoreError;
use crate::types::{EntryId, LogKey, WriterKey};

/// The current entry schema version.
pub const ENTRY_VERSION: u8 = 0;

/// Signed metadata of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Schema version (currently 0).
    pub version: u8,

    /// The log this entry belongs to.
    pub log: LogKey,

    /// The writer whose feed holds this entry.
    pub writer: WriterKey,

    /// Position in the writer's feed (1-indexed, contiguous).
    pub seq: u64,

    /// Lamport clock: one more than the largest clock the writer had seen.
    pub clock: u64,

    /// Blake3 hash of the payload bytes.
    pub payload_hash: Blake3Hash,
}

/// A signed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: EntryHeader,
    pub payload: Bytes,
    pub signature: Signature,
}

/// Position of an entry in the merged order of a log.
///
/// Sorting by `(clock, writer, seq)` is a total order that every replica
/// computes identically from the same set of entries, and that never places
/// an entry before one its writer had already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub clock: u64,
    pub writer: WriterKey,
    pub seq: u64,
}

impl Entry {
    pub fn log(&self) -> &LogKey {
        &self.header.log
    }

    pub fn writer(&self) -> &WriterKey {
        &self.header.writer
    }

    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    pub fn clock(&self) -> u64 {
        self.header.clock
    }

    /// Where this entry sorts in the merged order.
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            clock: self.header.clock,
            writer: self.header.writer,
            seq: self.header.seq,
        }
    }

    /// Compute the content address of this entry.
    pub fn compute_id(&self) -> EntryId {
        EntryId(*blake3::hash(&canonical_bytes(self)).as_bytes())
    }

    /// Check version, payload hash and signature.
    pub fn verify(&self) -> Result<(), CoreError> {
        if self.header.version != ENTRY_VERSION {
            return Err(CoreError::UnsupportedVersion(self.header.version));
        }

        if !Blake3Hash::hash(&self.payload).ct_eq(&self.header.payload_hash) {
            return Err(CoreError::PayloadHashMismatch {
                writer: self.header.writer.to_hex(),
                seq: self.header.seq,
            });
        }

        self.header
            .writer
            .verify(&signed_message(&self.header), &self.signature)
    }
}

/// Builder for entries appended by the local writer.
#[derive(Debug, Clone)]
pub struct EntryBuilder {
    log: LogKey,
    seq: u64,
    clock: u64,
    payload: Bytes,
}

impl EntryBuilder {
    /// Start an entry at `seq` in the local writer's feed for `log`.
    pub fn new(log: LogKey, seq: u64) -> Self {
        Self {
            log,
            seq,
            clock: 0,
            payload: Bytes::new(),
        }
    }

    pub fn clock(mut self, clock: u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sign with the writer's keypair. The writer key is taken from it.
    pub fn sign(self, keypair: &Keypair) -> Entry {
        let header = EntryHeader {
            version: ENTRY_VERSION,
            log: self.log,
            writer: keypair.writer_key(),
            seq: self.seq,
            clock: self.clock,
            payload_hash: Blake3Hash::hash(&self.payload),
        };
        let signature = keypair.sign(&signed_message(&header));

        Entry {
            header,
            payload: self.payload,
            signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(keypair: &Keypair, seq: u64, clock: u64) -> Entry {
        EntryBuilder::new(LogKey::from_bytes([9; 32]), seq)
            .clock(clock)
            .payload(format!("payload {}", seq).into_bytes())
            .sign(keypair)
    }

    #[test]
    fn test_signed_entry_verifies() {
        let keypair = Keypair::generate();
        let e = entry(&keypair, 1, 1);
        e.verify().unwrap();
        assert_eq!(e.writer(), &keypair.writer_key());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let keypair = Keypair::generate();
        let mut e = entry(&keypair, 1, 1);
        e.payload = Bytes::from_static(b"forged");
        assert!(matches!(e.verify(), Err(CoreError::PayloadHashMismatch { .. })));
    }

    #[test]
    fn test_tampered_header_is_rejected() {
        let keypair = Keypair::generate();
        let mut e = entry(&keypair, 1, 1);
        e.header.clock = 99;
        assert!(matches!(e.verify(), Err(CoreError::InvalidSignature)));
    }

    #[test]
    fn test_order_key_sorts_by_clock_then_writer() {
        let a = Keypair::from_seed(&[1; 32]);
        let b = Keypair::from_seed(&[2; 32]);
        let early = entry(&b, 5, 1).order_key();
        let late = entry(&a, 1, 2).order_key();
        assert!(early < late);

        let tie_a = entry(&a, 1, 3).order_key();
        let tie_b = entry(&b, 1, 3).order_key();
        assert_eq!(tie_a < tie_b, a.writer_key() < b.writer_key());
    }

    #[test]
    fn test_entry_id_is_content_addressed() {
        let keypair = Keypair::from_seed(&[3; 32]);
        assert_eq!(entry(&keypair, 1, 1).compute_id(), entry(&keypair, 1, 1).compute_id());
        assert_ne!(entry(&keypair, 1, 1).compute_id(), entry(&keypair, 2, 2).compute_id());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_any_signed_entry_verifies(
                seed in any::<[u8; 32]>(),
                seq in 1u64..1_000,
                clock in any::<u64>(),
                payload in prop::collection::vec(any::<u8>(), 0..256),
            ) {
                let keypair = Keypair::from_seed(&seed);
                let e = EntryBuilder::new(LogKey::from_bytes([9; 32]), seq)
                    .clock(clock)
                    .payload(payload)
                    .sign(&keypair);
                prop_assert!(e.verify().is_ok());
            }

            #[test]
            fn test_order_key_matches_tuple_order(
                a in (any::<u64>(), any::<[u8; 32]>(), any::<u64>()),
                b in (any::<u64>(), any::<[u8; 32]>(), any::<u64>()),
            ) {
                let key = |(clock, writer, seq): (u64, [u8; 32], u64)| OrderKey {
                    clock,
                    writer: WriterKey::from_bytes(writer),
                    seq,
                };
                prop_assert_eq!(key(a).cmp(&key(b)), a.cmp(&b));
            }
        }
    }
}
