//! # Tandem
//!
//! A shared, encrypted, multi-writer log with invite-based writer admission.
//!
//! ## Overview
//!
//! A [`Tandem`] wraps one replicated log and the view it is applied to:
//!
//! - **Apply**: the [`ApplyEngine`] turns merged operations into view
//!   mutations and writer set changes
//! - **Invites**: a writer creates an invite; its token is shared out of band
//! - **Admission**: a member verifies a candidate's request against the stored
//!   invite, adds the candidate as a writer and sends it the log's keys
//! - **Pairing**: a candidate holding a token drives a [`Pairer`] until it
//!   sees its own admission and can write
//!
//! ## Key Properties
//!
//! - **Built-ins first**: invite and writer operations are never handed to
//!   custom actions
//! - **First write wins**: a custom file write never replaces an existing file
//! - **Reusable invites**: admitting a candidate does not consume the invite
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem::{PairOptions, Tandem, TandemOptions};
//! use tandem::store::DriveView;
//! use tandem::sync::{MemoryNetwork, PeerStore};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!
//!     // The first peer creates the log and an invite.
//!     let owner = Tandem::open(
//!         PeerStore::new(),
//!         TandemOptions::new(DriveView::new()).with_network(&network),
//!     )
//!     .await
//!     .unwrap();
//!     let invite = owner.create_invite().await.unwrap();
//!
//!     // A second peer pairs with the invite.
//!     let pairer = Tandem::pair(
//!         PeerStore::new(),
//!         &invite,
//!         PairOptions::new(DriveView::new(), &network),
//!     )
//!     .unwrap();
//!     let peer = pairer.finished().await.unwrap();
//!     assert!(peer.writable());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tandem::core` - Keys, entries, operations and invite records
//! - `tandem::crypto` - Payload encryption and sealed boxes
//! - `tandem::store` - Views (ordered, drive, SQLite drive)
//! - `tandem::sync` - Replicated log, swarm and pairing

pub mod apply;
pub mod config;
pub mod error;
pub mod invite;
mod member;
pub mod pairer;
pub mod tandem;

pub use tandem_core as core;
pub use tandem_crypto as crypto;
pub use tandem_store as store;
pub use tandem_sync as sync;

pub use apply::{Action, ActionContext, ApplyEngine};
pub use config::{ActionErrorPolicy, TandemConfig};
pub use error::{ApplyError, Result, TandemError};
pub use invite::{current_invite, find_invite, stored_invite, unix_millis, INVITE_PATH};
pub use pairer::{Pairer, PairingPhase};
pub use tandem::{PairOptions, Tandem, TandemOptions};

pub use tandem_core::{InviteRecord, InviteToken, LogKey, Operation, WriterKey};
pub use tandem_store::{DriveView, OrderedView, SqliteDrive, View, ViewKind};
pub use tandem_sync::{LogUpdate, MemoryNetwork, PeerStore};
