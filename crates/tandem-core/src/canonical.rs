//! Canonical CBOR encoding of entry headers.
//!
//! Headers are encoded as a CBOR map with small integer keys in ascending
//! order, definite lengths and shortest integer encodings, so the same header
//! produces identical bytes (and signatures, and ids) on every replica.

use ciborium::value::Value;

use crate::entry::{Entry, EntryHeader};

/// Domain separation prefix for entry signatures.
pub const SIGN_DOMAIN: &[u8] = b"tandem-entry-v0:";

/// Header field keys. Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const VERSION: u64 = 0;
    pub const LOG: u64 = 1;
    pub const WRITER: u64 = 2;
    pub const SEQ: u64 = 3;
    pub const CLOCK: u64 = 4;
    pub const PAYLOAD_HASH: u64 = 5;
}

/// Encode an entry header to canonical CBOR bytes.
pub fn canonical_header_bytes(header: &EntryHeader) -> Vec<u8> {
    let value = Value::Map(vec![
        (
            Value::Integer(keys::VERSION.into()),
            Value::Integer(header.version.into()),
        ),
        (
            Value::Integer(keys::LOG.into()),
            Value::Bytes(header.log.0.to_vec()),
        ),
        (
            Value::Integer(keys::WRITER.into()),
            Value::Bytes(header.writer.0.to_vec()),
        ),
        (
            Value::Integer(keys::SEQ.into()),
            Value::Integer(header.seq.into()),
        ),
        (
            Value::Integer(keys::CLOCK.into()),
            Value::Integer(header.clock.into()),
        ),
        (
            Value::Integer(keys::PAYLOAD_HASH.into()),
            Value::Bytes(header.payload_hash.0.to_vec()),
        ),
    ]);

    let mut buf = Vec::with_capacity(128);
    ciborium::into_writer(&value, &mut buf).expect("CBOR serialization into a Vec cannot fail");
    buf
}

/// The message a writer signs: domain || canonical header.
///
/// The header commits to the payload through its hash.
pub fn signed_message(header: &EntryHeader) -> Vec<u8> {
    let header_bytes = canonical_header_bytes(header);
    let mut buf = Vec::with_capacity(SIGN_DOMAIN.len() + header_bytes.len());
    buf.extend_from_slice(SIGN_DOMAIN);
    buf.extend_from_slice(&header_bytes);
    buf
}

/// Encode an entire entry: canonical header || payload || signature.
pub fn canonical_bytes(entry: &Entry) -> Vec<u8> {
    let mut buf = canonical_header_bytes(&entry.header);
    buf.extend_from_slice(&entry.payload);
    buf.extend_from_slice(&entry.signature.0);
    buf
}
