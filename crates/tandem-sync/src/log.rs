//! Multi-writer log engine.
//!
//! Each writer appends to its own feed in the [`PeerStore`]. The log merges
//! every feed into one total order by `(clock, writer, seq)` and applies it,
//! one same-writer batch at a time, through a [`Reducer`] onto its view.
//!
//! Entries from writers outside the writer set at their position are skipped.
//! When newly received entries sort before ones already applied, the view is
//! cleared and the whole order is applied again, so every replica holding
//! the same entries ends with the same view.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tandem_core::{
    decode_value, encode_value, DiscoveryKey, Entry, EntryBuilder, Keypair, LogKey, OrderKey,
    WriterKey,
};
use tandem_crypto::{EncryptedBlock, EncryptionKey};
use tandem_store::View;

use crate::error::{Result, SyncError};
use crate::store::PeerStore;
use crate::swarm::Connection;
use crate::traits::{LogHost, LogUpdate, Node, Reducer, ReplicatedLog};

/// How to open a log.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Join an existing log. `None` creates a new one rooted at the local
    /// writer key.
    pub key: Option<LogKey>,
    /// Required when `key` is set.
    pub encryption_key: Option<EncryptionKey>,
}

impl LogOptions {
    pub fn existing(key: LogKey, encryption_key: EncryptionKey) -> Self {
        Self {
            key: Some(key),
            encryption_key: Some(encryption_key),
        }
    }
}

struct LogState<V> {
    view: V,
    writers: BTreeSet<WriterKey>,
    /// Order keys of every merged entry, applied or skipped.
    merged: Vec<OrderKey>,
    needs_rebuild: bool,
    view_closed: bool,
}

struct LogInner<V: View, R: Reducer<V>> {
    key: LogKey,
    discovery_key: DiscoveryKey,
    local: Keypair,
    encryption_key: EncryptionKey,
    store: PeerStore,
    reducer: R,
    state: Mutex<LogState<V>>,
    writable: AtomicBool,
    updates: broadcast::Sender<LogUpdate>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<V: View, R: Reducer<V>> LogInner<V, R> {
    fn bootstrap(&self) -> WriterKey {
        WriterKey::from(self.key)
    }

    fn stop_pump(&self) {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pump.abort();
        }
    }
}

impl<V: View, R: Reducer<V>> Drop for LogInner<V, R> {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// A replicated multi-writer log applying onto a view of type `V`.
///
/// Cheap to clone; clones are the same log.
pub struct Log<V: View, R: Reducer<V>> {
    inner: Arc<LogInner<V, R>>,
}

impl<V: View, R: Reducer<V>> Clone for Log<V, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The writer set as a reducer sees it.
struct Host<'a> {
    key: LogKey,
    discovery_key: DiscoveryKey,
    local: WriterKey,
    writers: &'a mut BTreeSet<WriterKey>,
}

impl LogHost for Host<'_> {
    fn key(&self) -> LogKey {
        self.key
    }

    fn discovery_key(&self) -> DiscoveryKey {
        self.discovery_key
    }

    fn local_writer(&self) -> WriterKey {
        self.local
    }

    fn writers(&self) -> Vec<WriterKey> {
        self.writers.iter().copied().collect()
    }

    fn is_writer(&self, key: &WriterKey) -> bool {
        self.writers.contains(key)
    }

    fn add_writer(&mut self, key: WriterKey) -> bool {
        self.writers.insert(key)
    }

    fn remove_writer(&mut self, key: &WriterKey) -> bool {
        self.writers.remove(key)
    }
}

impl<V: View, R: Reducer<V>> Log<V, R> {
    /// Open a log over `store`, applying onto `view` through `reducer`.
    ///
    /// Applies whatever the store already holds before returning.
    pub async fn open(store: PeerStore, view: V, reducer: R, options: LogOptions) -> Result<Self> {
        let local = store.local_writer();
        let (key, encryption_key) = match (options.key, options.encryption_key) {
            (None, None) => (LogKey::from(local.writer_key()), EncryptionKey::generate()),
            (None, Some(encryption_key)) => (LogKey::from(local.writer_key()), encryption_key),
            (Some(key), Some(encryption_key)) => (key, encryption_key),
            (Some(_), None) => {
                return Err(SyncError::InvalidOptions(
                    "an existing log needs its encryption key".into(),
                ))
            }
        };

        let bootstrap = WriterKey::from(key);
        let (updates, _) = broadcast::channel(256);
        let inner = Arc::new(LogInner {
            key,
            discovery_key: DiscoveryKey::derive(&key),
            writable: AtomicBool::new(local.writer_key() == bootstrap),
            local,
            encryption_key,
            store,
            reducer,
            state: Mutex::new(LogState {
                view,
                writers: BTreeSet::from([bootstrap]),
                merged: Vec::new(),
                needs_rebuild: false,
                view_closed: false,
            }),
            updates,
            pump: StdMutex::new(None),
            closed: AtomicBool::new(false),
        });

        // Subscribe before tracking so no growth is missed.
        let grew = inner.store.subscribe();
        inner.store.track(key);
        let pump = tokio::spawn(pump(Arc::downgrade(&inner), grew));
        *inner.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);

        let log = Self { inner };
        log.update().await?;
        debug!(log = %key, writable = log.writable(), "log opened");
        Ok(log)
    }

    pub fn store(&self) -> &PeerStore {
        &self.inner.store
    }

    pub fn reducer(&self) -> &R {
        &self.inner.reducer
    }

    /// Hand a connection to the store for replication.
    pub fn replicate(&self, connection: Connection) {
        self.inner.store.replicate(connection);
    }

    /// Lock the view.
    ///
    /// Holding the guard blocks updates.
    pub async fn view(&self) -> MappedMutexGuard<'_, V> {
        MutexGuard::map(self.inner.state.lock().await, |state| &mut state.view)
    }

    /// Number of merged entries, applied or skipped.
    pub async fn length(&self) -> u64 {
        self.inner.state.lock().await.merged.len() as u64
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Flush and close the view. Idempotent.
    pub async fn close_view(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.view_closed {
            return Ok(());
        }
        state.view_closed = true;
        let flushed = state.view.flush().await;
        let closed = state.view.close().await;
        flushed?;
        closed?;
        Ok(())
    }

    fn decode(&self, entry: &Entry) -> Result<Node> {
        let plaintext = EncryptedBlock::open(&entry.payload, &self.inner.encryption_key)?;
        Ok(Node {
            writer: *entry.writer(),
            seq: entry.seq(),
            value: decode_value(&plaintext)?,
        })
    }

    async fn merge(&self) -> Result<()> {
        let inner = &self.inner;
        let mut entries = inner.store.all_entries(&inner.key);
        entries.sort_by_key(Entry::order_key);

        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        if state.view_closed {
            return Err(SyncError::Closed);
        }

        let common = state
            .merged
            .iter()
            .zip(&entries)
            .take_while(|(merged, entry)| **merged == entry.order_key())
            .count();
        let rebuilt = state.needs_rebuild || common < state.merged.len();

        if rebuilt {
            debug!(log = %inner.key, merged = state.merged.len(), common, "rebuilding view");
            state.view.clear().await?;
            state.writers = BTreeSet::from([inner.bootstrap()]);
            state.merged.clear();
            state.needs_rebuild = false;
        } else if common == entries.len() {
            return Ok(());
        }

        let mut next = state.merged.len();
        while next < entries.len() {
            let writer = *entries[next].writer();
            let end = entries[next..]
                .iter()
                .position(|entry| *entry.writer() != writer)
                .map_or(entries.len(), |offset| next + offset);
            let batch = &entries[next..end];

            if state.writers.contains(&writer) {
                let mut nodes = Vec::with_capacity(batch.len());
                for entry in batch {
                    match self.decode(entry) {
                        Ok(node) => nodes.push(node),
                        Err(e) => {
                            warn!(
                                log = %inner.key,
                                writer = %writer,
                                seq = entry.seq(),
                                error = %e,
                                "skipping undecodable entry"
                            )
                        }
                    }
                }

                let mut host = Host {
                    key: inner.key,
                    discovery_key: inner.discovery_key,
                    local: inner.local.writer_key(),
                    writers: &mut state.writers,
                };
                if let Err(e) = inner.reducer.apply(&nodes, &mut state.view, &mut host).await {
                    state.needs_rebuild = true;
                    return Err(SyncError::Apply(Box::new(e)));
                }
            } else {
                warn!(
                    log = %inner.key,
                    writer = %writer,
                    entries = batch.len(),
                    "skipping entries from non-writer"
                );
            }

            state.merged.extend(batch.iter().map(Entry::order_key));
            next = end;
        }

        let writable = state.writers.contains(&inner.local.writer_key());
        inner.writable.store(writable, Ordering::SeqCst);
        let _ = inner.updates.send(LogUpdate {
            length: state.merged.len() as u64,
            writable,
            rebuilt,
        });
        Ok(())
    }
}

async fn pump<V: View, R: Reducer<V>>(
    inner: Weak<LogInner<V, R>>,
    mut grew: broadcast::Receiver<LogKey>,
) {
    loop {
        let key = match grew.recv().await {
            Ok(key) => Some(key),
            Err(broadcast::error::RecvError::Lagged(_)) => None,
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        if key.is_some_and(|key| key != inner.key) {
            continue;
        }

        let log = Log { inner };
        if let Err(e) = log.update().await {
            warn!(log = %log.key(), error = %e, "background update failed");
        }
    }
}

#[async_trait]
impl<V: View, R: Reducer<V>> ReplicatedLog for Log<V, R> {
    async fn ready(&self) -> Result<()> {
        self.update().await
    }

    async fn append(&self, value: Value) -> Result<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }

        let inner = &self.inner;
        let payload = EncryptedBlock::seal(&encode_value(&value)?, &inner.encryption_key)?;
        {
            let state = inner.state.lock().await;
            let writer = inner.local.writer_key();
            if !state.writers.contains(&writer) {
                return Err(SyncError::NotWritable);
            }
            let seq = inner.store.length(&inner.key, &writer) + 1;
            let clock = inner.store.max_clock(&inner.key) + 1;
            let entry = EntryBuilder::new(inner.key, seq)
                .clock(clock)
                .payload(payload)
                .sign(&inner.local);
            inner.store.ingest(entry)?;
        }

        self.merge().await
    }

    async fn update(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        self.merge().await
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.stop_pump();
        let result = self.close_view().await;
        debug!(log = %self.inner.key, "log closed");
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<LogUpdate> {
        self.inner.updates.subscribe()
    }

    fn writable(&self) -> bool {
        self.inner.writable.load(Ordering::SeqCst)
    }

    fn local_key(&self) -> WriterKey {
        self.inner.local.writer_key()
    }

    fn key(&self) -> LogKey {
        self.inner.key
    }

    fn discovery_key(&self) -> DiscoveryKey {
        self.inner.discovery_key
    }

    fn encryption_key(&self) -> EncryptionKey {
        self.inner.encryption_key.clone()
    }

    async fn writers(&self) -> Vec<WriterKey> {
        self.inner
            .state
            .lock()
            .await
            .writers
            .iter()
            .copied()
            .collect()
    }
}

impl<V: View, R: Reducer<V>> std::fmt::Debug for Log<V, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("key", &self.inner.key)
            .field("local", &self.inner.local.writer_key())
            .field("writable", &self.writable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fmt;
    use std::time::Duration;
    use tandem_store::OrderedView;

    #[derive(Debug)]
    struct Rejected;

    impl fmt::Display for Rejected {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "rejected")
        }
    }

    impl std::error::Error for Rejected {}

    /// Appends every value; `{"add": hex}` also adds a writer and
    /// `{"fail": true}` fails the batch.
    struct Recorder;

    #[async_trait]
    impl Reducer<OrderedView> for Recorder {
        type Error = Rejected;

        async fn apply(
            &self,
            nodes: &[Node],
            view: &mut OrderedView,
            host: &mut dyn LogHost,
        ) -> std::result::Result<(), Rejected> {
            for node in nodes {
                if node.value["fail"] == json!(true) {
                    return Err(Rejected);
                }
                if let Some(key) = node.value["add"].as_str() {
                    host.add_writer(WriterKey::from_hex(key).map_err(|_| Rejected)?);
                }
                view.append(node.value.clone()).await.map_err(|_| Rejected)?;
            }
            Ok(())
        }
    }

    async fn open(store: &PeerStore, options: LogOptions) -> Log<OrderedView, Recorder> {
        Log::open(store.clone(), OrderedView::new(), Recorder, options)
            .await
            .unwrap()
    }

    async fn values(log: &Log<OrderedView, Recorder>) -> Vec<Value> {
        log.view().await.values().to_vec()
    }

    #[tokio::test]
    async fn test_creator_is_writable() {
        let store = PeerStore::new();
        let log = open(&store, LogOptions::default()).await;
        assert!(log.writable());
        assert_eq!(log.key(), LogKey::from(store.local_writer().writer_key()));

        log.append(json!({ "n": 1 })).await.unwrap();
        log.append(json!({ "n": 2 })).await.unwrap();
        assert_eq!(values(&log).await, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    }

    #[tokio::test]
    async fn test_non_writer_cannot_append() {
        let creator = PeerStore::new();
        let log = open(&creator, LogOptions::default()).await;

        let other = PeerStore::new();
        let joined = open(
            &other,
            LogOptions::existing(log.key(), log.encryption_key()),
        )
        .await;
        assert!(!joined.writable());
        assert!(matches!(
            joined.append(json!(1)).await,
            Err(SyncError::NotWritable)
        ));
    }

    #[tokio::test]
    async fn test_existing_key_requires_encryption_key() {
        let store = PeerStore::new();
        let result = Log::open(
            store,
            OrderedView::new(),
            Recorder,
            LogOptions {
                key: Some(LogKey::from_bytes([1; 32])),
                encryption_key: None,
            },
        )
        .await;
        assert!(matches!(result, Err(SyncError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn test_added_writer_appends_and_replicas_agree() {
        let a_store = PeerStore::new();
        let b_store = PeerStore::new();
        let a = open(&a_store, LogOptions::default()).await;
        let b = open(&b_store, LogOptions::existing(a.key(), a.encryption_key())).await;

        a.append(json!({ "add": b.local_key().to_hex() })).await.unwrap();
        b_store.pull(&a_store, &a.key());
        b.update().await.unwrap();
        assert!(b.writable());

        b.append(json!({ "from": "b" })).await.unwrap();
        a.append(json!({ "from": "a" })).await.unwrap();
        a_store.pull(&b_store, &a.key());
        b_store.pull(&a_store, &a.key());
        a.update().await.unwrap();
        b.update().await.unwrap();

        assert_eq!(values(&a).await, values(&b).await);
        assert_eq!(a.writers().await, b.writers().await);
        assert_eq!(a.length().await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_entries_rebuild_to_same_order() {
        let a_store = PeerStore::new();
        let b_store = PeerStore::new();
        let a = open(&a_store, LogOptions::default()).await;
        let b = open(&b_store, LogOptions::existing(a.key(), a.encryption_key())).await;

        a.append(json!({ "add": b.local_key().to_hex() })).await.unwrap();
        b_store.pull(&a_store, &a.key());
        b.update().await.unwrap();

        // Both append without seeing each other; one side must reorder.
        a.append(json!("a1")).await.unwrap();
        a.append(json!("a2")).await.unwrap();
        b.append(json!("b1")).await.unwrap();

        a_store.pull(&b_store, &a.key());
        b_store.pull(&a_store, &a.key());
        a.update().await.unwrap();
        b.update().await.unwrap();

        assert_eq!(values(&a).await, values(&b).await);
        assert_eq!(values(&a).await.len(), 4);
    }

    #[tokio::test]
    async fn test_entries_from_non_writers_are_skipped() {
        let a_store = PeerStore::new();
        let b_store = PeerStore::new();
        let a = open(&a_store, LogOptions::default()).await;
        b_store.track(a.key());

        let payload = EncryptedBlock::seal(
            &encode_value(&json!("sneaky")).unwrap(),
            &a.encryption_key(),
        )
        .unwrap();
        let forged = EntryBuilder::new(a.key(), 1)
            .clock(1)
            .payload(payload)
            .sign(&b_store.local_writer());
        b_store.ingest(forged).unwrap();

        a_store.pull(&b_store, &a.key());
        a.update().await.unwrap();
        assert!(values(&a).await.is_empty());
        assert_eq!(a.length().await, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_rebuilds_next_time() {
        let store = PeerStore::new();
        let log = open(&store, LogOptions::default()).await;
        log.append(json!("ok")).await.unwrap();

        let err = log.append(json!({ "fail": true })).await.unwrap_err();
        assert!(matches!(err, SyncError::Apply(_)));

        let mut updates = log.subscribe();
        assert!(log.update().await.is_err());
        assert!(updates.try_recv().is_err());
        assert_eq!(values(&log).await, vec![json!("ok")]);
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let store = PeerStore::new();
        let log = open(&store, LogOptions::default()).await;
        let mut updates = log.subscribe();

        log.append(json!(1)).await.unwrap();
        let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.length, 1);
        assert!(update.writable);
    }

    #[tokio::test]
    async fn test_closed_log_rejects_appends() {
        let store = PeerStore::new();
        let log = open(&store, LogOptions::default()).await;
        log.close().await.unwrap();
        log.close().await.unwrap();
        assert!(matches!(log.append(json!(1)).await, Err(SyncError::Closed)));
    }
}
