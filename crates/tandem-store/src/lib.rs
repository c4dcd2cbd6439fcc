//! # Tandem Store
//!
//! Views: the application-visible projections a log's operations are applied
//! to.
//!
//! ## Key Types
//!
//! - [`View`] - The async trait every view variant implements
//! - [`OrderedView`] - In-memory append-only sequence of JSON values
//! - [`DriveView`] - In-memory path-keyed file tree over an append-only blob store
//! - [`SqliteDrive`] - Persistent drive on SQLite
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem_store::{SqliteDrive, View};
//! use bytes::Bytes;
//!
//! async fn example() {
//!     let mut drive = SqliteDrive::open("view.db").unwrap();
//!     drive.put("notes/today.txt", Bytes::from_static(b"hello")).await.unwrap();
//!     drive.flush().await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Exclusive ownership**: a view belongs to one log and is only mutated
//!   from its apply pass, so there is no internal write locking.
//! - **Flush is the durability point**: the SQLite drive commits on flush.
//! - **Clear**: the log clears and re-applies a view when merge order changes.

pub mod drive;
pub mod error;
pub mod migration;
pub mod ordered;
pub mod sqlite;
pub mod traits;

pub use drive::{BlobRef, DriveView};
pub use error::{Result, StoreError};
pub use ordered::OrderedView;
pub use sqlite::SqliteDrive;
pub use traits::{FileEntry, Matcher, View, ViewKind};
