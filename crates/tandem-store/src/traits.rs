//! View trait: the projection a log's operations are applied to.
//!
//! A view is exclusively owned by one log and mutated only from its apply
//! pass, so mutating methods take `&mut self`. Two variants exist:
//!
//! - **Ordered**: an append-only sequence of JSON values. Lookup is a linear
//!   scan for the first value matching a predicate. Nothing can be deleted.
//! - **Drive**: a path-keyed file tree of blobs, plus an ordered entry list
//!   for values that are not files.
//!
//! Capabilities a variant lacks return [`StoreError::Unsupported`].

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Which variant a view is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Ordered,
    Drive,
}

/// One file in a drive view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

/// Predicate for [`View::find`].
pub type Matcher<'a> = dyn for<'v> Fn(&'v Value) -> bool + Send + Sync + 'a;

fn unsupported<T>(kind: ViewKind, op: &str) -> Result<T> {
    Err(StoreError::Unsupported(format!("{} on {:?} view", op, kind)))
}

/// The View trait: async interface for every view variant.
///
/// All methods are async so a persistent variant can run its I/O off the
/// runtime threads.
#[async_trait]
pub trait View: Send + Sync + 'static {
    fn kind(&self) -> ViewKind;

    // ─────────────────────────────────────────────────────────────────────────
    // Ordered entries
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a value. Returns its index.
    async fn append(&mut self, value: Value) -> Result<u64>;

    /// Number of appended values.
    async fn len(&self) -> Result<u64>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// The value at `index`, if any.
    async fn entry(&self, index: u64) -> Result<Option<Value>>;

    /// First appended value matching `matcher`, in append order.
    async fn find(&self, matcher: &Matcher<'_>) -> Result<Option<Value>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    /// Write `blob` at `path`, replacing any existing file.
    async fn put(&mut self, _path: &str, _blob: Bytes) -> Result<()> {
        unsupported(self.kind(), "put")
    }

    async fn get(&self, _path: &str) -> Result<Option<Bytes>> {
        unsupported(self.kind(), "get")
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Remove the file at `path`. Returns whether it existed.
    async fn delete(&mut self, _path: &str) -> Result<bool> {
        unsupported(self.kind(), "delete")
    }

    /// Files whose path starts with `prefix`, sorted by path.
    async fn list(&self, _prefix: &str) -> Result<Vec<FileEntry>> {
        unsupported(self.kind(), "list")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Make everything written so far durable.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drop all content. Used when the log re-applies its history.
    async fn clear(&mut self) -> Result<()>;

    /// Release resources. Further calls fail with [`StoreError::Closed`].
    async fn close(&mut self) -> Result<()>;
}
