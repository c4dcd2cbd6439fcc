//! In-memory drive view.
//!
//! Files are kept as references into an append-only blob store, indexed by
//! path in an ordered map. Overwriting or deleting a path only changes the
//! index; blobs themselves are never rewritten.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::traits::{FileEntry, Matcher, View, ViewKind};

/// Where a file's content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef {
    /// Index into the blob store.
    pub blob: u64,
    pub size: u64,
}

/// Path-keyed file tree over an append-only blob store.
#[derive(Debug, Default)]
pub struct DriveView {
    index: BTreeMap<String, BlobRef>,
    blobs: Vec<Bytes>,
    entries: Vec<Value>,
    closed: bool,
}

impl DriveView {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index record for `path`.
    pub fn stat(&self, path: &str) -> Option<BlobRef> {
        self.index.get(path).copied()
    }

    /// Number of blobs ever written, including ones no longer referenced.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn blob(&self, blob_ref: BlobRef) -> Result<Bytes> {
        usize::try_from(blob_ref.blob)
            .ok()
            .and_then(|i| self.blobs.get(i))
            .cloned()
            .ok_or_else(|| StoreError::InvalidData(format!("dangling blob {}", blob_ref.blob)))
    }
}

#[async_trait]
impl View for DriveView {
    fn kind(&self) -> ViewKind {
        ViewKind::Drive
    }

    async fn append(&mut self, value: Value) -> Result<u64> {
        self.ensure_open()?;
        self.entries.push(value);
        Ok(self.entries.len() as u64 - 1)
    }

    async fn len(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.entries.len() as u64)
    }

    async fn entry(&self, index: u64) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .cloned())
    }

    async fn find(&self, matcher: &Matcher<'_>) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.entries.iter().find(|v| matcher(v)).cloned())
    }

    async fn put(&mut self, path: &str, blob: Bytes) -> Result<()> {
        self.ensure_open()?;
        let blob_ref = BlobRef {
            blob: self.blobs.len() as u64,
            size: blob.len() as u64,
        };
        self.blobs.push(blob);
        self.index.insert(path.to_string(), blob_ref);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        match self.index.get(path) {
            Some(blob_ref) => self.blob(*blob_ref).map(Some),
            None => Ok(None),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.contains_key(path))
    }

    async fn delete(&mut self, path: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.remove(path).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        self.ensure_open()?;
        Ok(self
            .index
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob_ref)| FileEntry {
                path: path.clone(),
                size: blob_ref.size,
            })
            .collect())
    }

    async fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.index.clear();
        self.blobs.clear();
        self.entries.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
