//! Peer store: every feed a peer holds, for every log it has opened.
//!
//! The store verifies signatures and feed contiguity but never decrypts.
//! Replication between stores copies entries verbatim, so a peer can hold
//! and forward a log it cannot read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rand::RngCore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tandem_core::{Entry, Keypair, LogKey, WriterKey};

use crate::error::{Result, SyncError};
use crate::swarm::Connection;

const KEYPAIR_CONTEXT: &str = "tandem 2024 named keypair v0";

/// Feeds of one log, by writer. Entry `n` of a feed sits at index `n - 1`.
type Feeds = HashMap<WriterKey, Vec<Entry>>;

/// A peer's entry storage and replication endpoint.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PeerStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    seed: [u8; 32],
    logs: RwLock<HashMap<LogKey, Feeds>>,
    grew: broadcast::Sender<LogKey>,
    replication: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PeerStore {
    /// A store with a random primary seed.
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// A store whose derived keys are fixed by `seed`.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let (grew, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(StoreInner {
                seed,
                logs: RwLock::new(HashMap::new()),
                grew,
                replication: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Derive a named keypair from the primary seed.
    pub fn keypair(&self, name: &str) -> Keypair {
        let mut material = Vec::with_capacity(32 + name.len());
        material.extend_from_slice(&self.inner.seed);
        material.extend_from_slice(name.as_bytes());
        Keypair::from_seed(&blake3::derive_key(KEYPAIR_CONTEXT, &material))
    }

    /// The keypair this peer writes with, on every log.
    pub fn local_writer(&self) -> Keypair {
        self.keypair("local")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<LogKey, Feeds>> {
        self.inner.logs.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Start holding feeds for `log`.
    pub fn track(&self, log: LogKey) {
        let added = {
            let mut logs = self.inner.logs.write().unwrap_or_else(|e| e.into_inner());
            if logs.contains_key(&log) {
                false
            } else {
                logs.insert(log, HashMap::new());
                true
            }
        };
        if added {
            debug!(log = %log, "tracking log");
            // Live replication sessions pick the new log up from this.
            let _ = self.inner.grew.send(log);
        }
    }

    pub fn is_tracked(&self, log: &LogKey) -> bool {
        self.read().contains_key(log)
    }

    pub fn tracked(&self) -> Vec<LogKey> {
        self.read().keys().copied().collect()
    }

    /// Length of `writer`'s feed in `log`.
    pub fn length(&self, log: &LogKey, writer: &WriterKey) -> u64 {
        self.read()
            .get(log)
            .and_then(|feeds| feeds.get(writer))
            .map_or(0, |feed| feed.len() as u64)
    }

    /// `(writer, length)` for every non-empty feed of `log`.
    pub fn heads(&self, log: &LogKey) -> Vec<(WriterKey, u64)> {
        self.read()
            .get(log)
            .map(|feeds| {
                feeds
                    .iter()
                    .map(|(writer, feed)| (*writer, feed.len() as u64))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries of `writer`'s feed with seq greater than `after`.
    pub fn entries(&self, log: &LogKey, writer: &WriterKey, after: u64) -> Vec<Entry> {
        self.read()
            .get(log)
            .and_then(|feeds| feeds.get(writer))
            .map(|feed| feed.iter().skip(after as usize).cloned().collect())
            .unwrap_or_default()
    }

    /// Every entry of every feed of `log`, in no particular order.
    pub fn all_entries(&self, log: &LogKey) -> Vec<Entry> {
        self.read()
            .get(log)
            .map(|feeds| feeds.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Largest clock of any entry held for `log`.
    pub fn max_clock(&self, log: &LogKey) -> u64 {
        self.read()
            .get(log)
            .and_then(|feeds| feeds.values().filter_map(|feed| feed.last()).map(Entry::clock).max())
            .unwrap_or(0)
    }

    /// Add an entry to its feed.
    ///
    /// Returns `false` if the identical entry is already held. Fails if the
    /// entry does not verify, skips ahead of the feed, or conflicts with a
    /// held entry at the same position.
    pub fn ingest(&self, entry: Entry) -> Result<bool> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        entry.verify()?;

        let log = *entry.log();
        {
            let mut logs = self.inner.logs.write().unwrap_or_else(|e| e.into_inner());
            let feeds = logs
                .get_mut(&log)
                .ok_or_else(|| SyncError::InvalidEntry(format!("log {} is not tracked", log)))?;
            let feed = feeds.entry(*entry.writer()).or_default();
            let len = feed.len() as u64;

            if entry.seq() == 0 || entry.seq() > len + 1 {
                return Err(SyncError::InvalidEntry(format!(
                    "entry {} #{} does not extend feed of length {}",
                    entry.writer(),
                    entry.seq(),
                    len
                )));
            }

            if entry.seq() <= len {
                let held = &feed[(entry.seq() - 1) as usize];
                if held.compute_id() == entry.compute_id() {
                    return Ok(false);
                }
                return Err(SyncError::InvalidEntry(format!(
                    "conflicting entry {} #{}",
                    entry.writer(),
                    entry.seq()
                )));
            }

            feed.push(entry);
        }

        let _ = self.inner.grew.send(log);
        Ok(true)
    }

    /// Notifications naming a log whose feeds grew (or that started being
    /// tracked).
    pub fn subscribe(&self) -> broadcast::Receiver<LogKey> {
        self.inner.grew.subscribe()
    }

    /// Copy everything `remote` holds for `log` that this store lacks.
    ///
    /// Returns the number of entries ingested. A feed with an invalid entry
    /// is abandoned at that entry.
    pub fn pull(&self, remote: &PeerStore, log: &LogKey) -> usize {
        if !self.is_tracked(log) {
            return 0;
        }

        let mut ingested = 0;
        for (writer, remote_len) in remote.heads(log) {
            let local_len = self.length(log, &writer);
            if remote_len <= local_len {
                continue;
            }
            for entry in remote.entries(log, &writer, local_len) {
                match self.ingest(entry) {
                    Ok(true) => ingested += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            log = %log,
                            writer = %writer,
                            error = %e,
                            "rejected replicated entry"
                        );
                        break;
                    }
                }
            }
        }
        ingested
    }

    fn pull_all(&self, remote: &PeerStore) -> usize {
        self.tracked().iter().map(|log| self.pull(remote, log)).sum()
    }

    /// Replicate from the remote end of `connection` until it closes.
    ///
    /// Pulls everything once, then again whenever either side reports growth.
    /// Both ends of a connection run this, so data flows both ways.
    pub fn replicate(&self, connection: Connection) {
        if self.is_closed() {
            return;
        }

        let local = self.clone();
        let handle = tokio::spawn(async move { local.run_replication(connection).await });

        let mut tasks = self
            .inner
            .replication
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn run_replication(self, mut connection: Connection) {
        let remote = connection.remote_store.clone();
        let mut remote_rx = remote.subscribe();
        let mut local_rx = self.subscribe();

        debug!(remote = %connection.remote, topic = %connection.topic, "replication started");
        let pulled = self.pull_all(&remote);
        if pulled > 0 {
            debug!(remote = %connection.remote, pulled, "initial pull");
        }

        loop {
            tokio::select! {
                msg = remote_rx.recv() => match msg {
                    Ok(log) => {
                        self.pull(&remote, &log);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.pull_all(&remote);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                msg = local_rx.recv() => match msg {
                    Ok(log) => {
                        self.pull(&remote, &log);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.pull_all(&remote);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = connection.closed() => break,
            }
        }

        debug!(remote = %connection.remote, "replication stopped");
    }

    /// Stop all replication. Held feeds stay readable.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks = std::mem::take(
            &mut *self
                .inner
                .replication
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        for task in tasks {
            task.abort();
        }
        debug!("peer store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for PeerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PeerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerStore")
            .field("local", &self.local_writer().writer_key())
            .field("logs", &self.read().len())
            .finish()
    }
}
