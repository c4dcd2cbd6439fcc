//! Seams between the log engine and what runs on top of it.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use tandem_core::{DiscoveryKey, LogKey, WriterKey};
use tandem_crypto::EncryptionKey;
use tandem_store::View;

use crate::error::Result;

/// One decrypted operation, in merge order.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub writer: WriterKey,
    pub seq: u64,
    pub value: Value,
}

/// What a reducer may see and change of the log while applying.
///
/// The writer set is only ever changed from here, so every replica changes it
/// at the same point of the merged order.
pub trait LogHost: Send {
    fn key(&self) -> LogKey;

    fn discovery_key(&self) -> DiscoveryKey;

    /// This replica's writer key.
    fn local_writer(&self) -> WriterKey;

    fn writers(&self) -> Vec<WriterKey>;

    fn is_writer(&self, key: &WriterKey) -> bool;

    /// Returns `false` if `key` was already a writer.
    fn add_writer(&mut self, key: WriterKey) -> bool;

    /// Returns `false` if `key` was not a writer.
    fn remove_writer(&mut self, key: &WriterKey) -> bool;
}

/// Turns batches of merged operations into view mutations.
///
/// Called with one batch at a time, never re-entrantly. Must be a pure
/// function of the view state and the batch: every replica applies the same
/// batches and must end with the same view.
#[async_trait]
pub trait Reducer<V: View>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn apply(
        &self,
        nodes: &[Node],
        view: &mut V,
        host: &mut dyn LogHost,
    ) -> std::result::Result<(), Self::Error>;
}

/// Emitted after an update that changed the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogUpdate {
    /// Entries merged so far, applied or skipped.
    pub length: u64,
    pub writable: bool,
    /// Whether the view was rebuilt from scratch.
    pub rebuilt: bool,
}

/// A multi-writer log with a merged view.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Apply whatever the local store already holds.
    async fn ready(&self) -> Result<()>;

    /// Append an operation as the local writer. Returns once it is stored
    /// and applied locally.
    async fn append(&self, value: Value) -> Result<()>;

    /// Merge newly received entries into the view.
    async fn update(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<LogUpdate>;

    /// Whether the local writer is in the writer set.
    fn writable(&self) -> bool;

    fn local_key(&self) -> WriterKey;

    fn key(&self) -> LogKey;

    fn discovery_key(&self) -> DiscoveryKey;

    fn encryption_key(&self) -> EncryptionKey;

    async fn writers(&self) -> Vec<WriterKey>;
}
