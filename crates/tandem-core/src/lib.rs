//! # Tandem Core
//!
//! Pure primitives shared by every Tandem crate: key identifiers, signed log
//! entries, the operation wire format, and invites.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`LogKey`] / [`DiscoveryKey`] - Identity of a shared log and its swarm topic
//! - [`WriterKey`] - A public key allowed (or not) to append to a log
//! - [`Entry`] - One signed block in a writer's feed
//! - [`Operation`] - The decoded form of a value appended to the log
//! - [`InviteRecord`] / [`InviteToken`] - Credentials for writer admission
//!
//! ## Canonicalization
//!
//! Entry headers are signed over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod invite;
pub mod operation;
pub mod types;

pub use canonical::{canonical_bytes, canonical_header_bytes, signed_message};
pub use crypto::{Blake3Hash, Keypair, Signature};
pub use entry::{Entry, EntryBuilder, EntryHeader, OrderKey, ENTRY_VERSION};
pub use error::{CoreError, Result};
pub use invite::{InviteRecord, InviteToken, INVITE_TTL_MS};
pub use operation::{decode_value, encode_value, CustomOp, FileWrite, Operation};
pub use types::{DiscoveryKey, EntryId, InviteId, LogKey, PeerId, WriterKey};
