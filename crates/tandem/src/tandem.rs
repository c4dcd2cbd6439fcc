//! The Tandem facade: one shared log, its view, and writer admission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, MappedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tandem_core::{DiscoveryKey, InviteRecord, LogKey, Operation, WriterKey};
use tandem_crypto::EncryptionKey;
use tandem_store::{FileEntry, View, ViewKind};
use tandem_sync::{
    Log, LogOptions, LogUpdate, MemoryNetwork, MemoryPairing, MemorySwarm, Pairing, PeerStore,
    ReplicatedLog, Swarm,
};

use crate::apply::ApplyEngine;
use crate::config::TandemConfig;
use crate::error::{Result, TandemError};
use crate::invite::{current_invite, stored_invite, unix_millis};
use crate::member::spawn_member;
use crate::pairer::Pairer;

/// Per-instance inputs for [`Tandem::open`].
pub struct TandemOptions<V: View> {
    pub view: V,
    pub engine: ApplyEngine<V>,
    /// Join an existing log instead of creating one.
    pub key: Option<LogKey>,
    pub encryption_key: Option<EncryptionKey>,
    /// Swarm and pairing substrate. Without one the instance is local only.
    pub network: Option<MemoryNetwork>,
    pub config: TandemConfig,
}

impl<V: View> TandemOptions<V> {
    pub fn new(view: V) -> Self {
        Self {
            view,
            engine: ApplyEngine::new(),
            key: None,
            encryption_key: None,
            network: None,
            config: TandemConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: ApplyEngine<V>) -> Self {
        self.engine = engine;
        self
    }

    /// Open the existing log `key`.
    pub fn with_log(mut self, key: LogKey, encryption_key: EncryptionKey) -> Self {
        self.key = Some(key);
        self.encryption_key = Some(encryption_key);
        self
    }

    pub fn with_network(mut self, network: &MemoryNetwork) -> Self {
        self.network = Some(network.clone());
        self
    }

    pub fn with_config(mut self, config: TandemConfig) -> Self {
        self.config = config;
        self
    }
}

/// Per-instance inputs for [`Tandem::pair`]. The log keys arrive with the
/// member's confirm.
pub struct PairOptions<V: View> {
    pub view: V,
    pub engine: ApplyEngine<V>,
    pub network: MemoryNetwork,
    pub config: TandemConfig,
}

impl<V: View> PairOptions<V> {
    pub fn new(view: V, network: &MemoryNetwork) -> Self {
        Self {
            view,
            engine: ApplyEngine::new(),
            network: network.clone(),
            config: TandemConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: ApplyEngine<V>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_config(mut self, config: TandemConfig) -> Self {
        self.config = config;
        self
    }
}

struct TandemInner<V: View> {
    store: PeerStore,
    log: Log<V, ApplyEngine<V>>,
    config: TandemConfig,
    swarm: Option<Box<dyn Swarm>>,
    pairing: Option<Box<dyn Pairing>>,
    member: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// A shared multi-writer log with a view and invite-based admission.
///
/// Cheap to clone; clones are the same instance.
pub struct Tandem<V: View> {
    inner: Arc<TandemInner<V>>,
}

impl<V: View> Clone for Tandem<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: View> Tandem<V> {
    /// Open (or create) a log on `store`.
    ///
    /// With a network and `config.replicate`, also joins the log's topic and
    /// starts admitting candidates.
    pub async fn open(store: PeerStore, options: TandemOptions<V>) -> Result<Self> {
        let TandemOptions {
            view,
            engine,
            key,
            encryption_key,
            network,
            config,
        } = options;

        let options = LogOptions {
            key,
            encryption_key,
        };
        let log = open_log(&store, view, engine, &config, options).await?;
        let swarm = network
            .as_ref()
            .map(|network| Box::new(MemorySwarm::new(network, store.clone())) as Box<dyn Swarm>);
        let pairing = network
            .as_ref()
            .map(|network| Box::new(MemoryPairing::new(network)) as Box<dyn Pairing>);

        Self::assemble(store, log, config, swarm, pairing).await
    }

    /// Start pairing into an existing log with an invite.
    ///
    /// Fails straight away if `invite` does not decode.
    pub fn pair(store: PeerStore, invite: &str, options: PairOptions<V>) -> Result<Pairer<V>> {
        Pairer::start(store, invite, options)
    }

    pub(crate) async fn assemble(
        store: PeerStore,
        log: Log<V, ApplyEngine<V>>,
        config: TandemConfig,
        swarm: Option<Box<dyn Swarm>>,
        pairing: Option<Box<dyn Pairing>>,
    ) -> Result<Self> {
        let mut member = None;
        if config.replicate {
            let joined = match (&swarm, &pairing) {
                (Some(swarm), Some(pairing)) => join(&log, swarm.as_ref(), pairing.as_ref()).await,
                _ => Ok(None),
            };
            match joined {
                Ok(handle) => member = handle,
                Err(e) => {
                    if let Some(swarm) = &swarm {
                        if let Err(destroy) = swarm.destroy().await {
                            warn!(step = "swarm", error = %destroy, "teardown step failed");
                        }
                    }
                    if let Err(close) = log.close().await {
                        warn!(step = "log", error = %close, "teardown step failed");
                    }
                    return Err(e);
                }
            }
        }

        info!(
            log = %log.key(),
            writer = %log.local_key(),
            writable = log.writable(),
            "tandem opened"
        );
        Ok(Self {
            inner: Arc::new(TandemInner {
                store,
                log,
                config,
                swarm,
                pairing,
                member: Mutex::new(member),
                closed: AtomicBool::new(false),
            }),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn local_writer_key(&self) -> WriterKey {
        self.inner.log.local_key()
    }

    pub fn key(&self) -> LogKey {
        self.inner.log.key()
    }

    pub fn discovery_key(&self) -> DiscoveryKey {
        self.inner.log.discovery_key()
    }

    pub fn encryption_key(&self) -> EncryptionKey {
        self.inner.log.encryption_key()
    }

    pub fn writable(&self) -> bool {
        self.inner.log.writable()
    }

    pub fn config(&self) -> &TandemConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &PeerStore {
        &self.inner.store
    }

    pub fn log(&self) -> &Log<V, ApplyEngine<V>> {
        &self.inner.log
    }

    /// Lock the current view. Holding the guard blocks updates.
    pub async fn view(&self) -> MappedMutexGuard<'_, V> {
        self.inner.log.view().await
    }

    pub async fn writers(&self) -> Vec<WriterKey> {
        self.inner.log.writers().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogUpdate> {
        self.inner.log.subscribe()
    }

    /// Number of live swarm connections.
    pub fn connection_count(&self) -> usize {
        self.inner
            .swarm
            .as_ref()
            .map_or(0, |swarm| swarm.connection_count())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an operation. Returns once it is stored and applied locally.
    ///
    /// A value the apply engine would reject is refused before anything is
    /// stored.
    pub async fn append(&self, value: Value) -> Result<()> {
        let kind = self.view().await.kind();
        ApplyEngine::<V>::validate(&value, kind)?;
        Ok(self.inner.log.append(value).await?)
    }

    /// Merge and apply whatever has been replicated so far.
    pub async fn update(&self) -> Result<()> {
        Ok(self.inner.log.update().await?)
    }

    pub async fn add_writer(&self, key: WriterKey) -> Result<()> {
        self.append(Operation::AddWriter(key).to_value()).await
    }

    pub async fn remove_writer(&self, key: WriterKey) -> Result<()> {
        self.append(Operation::RemoveWriter(key).to_value()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invites
    // ─────────────────────────────────────────────────────────────────────────

    /// The shareable token of the current invite, creating one if there is
    /// no unexpired invite.
    pub async fn create_invite(&self) -> Result<String> {
        let now = unix_millis();
        let existing = current_invite(&*self.view().await, now).await?;
        if let Some(record) = existing {
            debug!(invite = %record.id, "reusing invite");
            return Ok(record.token.encode());
        }

        let record = InviteRecord::generate(now, self.inner.config.invite_ttl_ms());
        self.append(Operation::AddInvite(record.clone()).to_value())
            .await?;
        info!(invite = %record.id, expires = record.expires, "invite created");
        Ok(record.token.encode())
    }

    /// Delete the current invite, if any.
    ///
    /// Ordered views cannot delete, so this fails with
    /// [`TandemError::UnsupportedOperation`] before appending anything.
    pub async fn delete_invite(&self) -> Result<()> {
        let existing = {
            let view = self.view().await;
            if view.kind() == ViewKind::Ordered {
                return Err(TandemError::UnsupportedOperation(
                    "cannot delete an invite from an ordered view".into(),
                ));
            }
            stored_invite(&*view).await?
        };

        if let Some(record) = existing {
            let id = record.id;
            self.append(Operation::DelInvite(record).to_value()).await?;
            info!(invite = %id, "invite deleted");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Drive views
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn read_file(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.view().await.get(path).await?)
    }

    pub async fn files(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        Ok(self.view().await.list(prefix).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Release everything: member, pairing, swarm, view, then log.
    ///
    /// Every step runs even if an earlier one fails; failures are returned
    /// together as [`TandemError::Teardown`]. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut errors = Vec::new();
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!(step, error = %e, "teardown step failed");
                errors.push(e);
            }
        };

        let member = self
            .inner
            .member
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(member) = member {
            member.abort();
            let result = match member.await {
                Err(e) if e.is_panic() => Err(TandemError::Task(e.to_string())),
                _ => Ok(()),
            };
            record("member", result);
        }
        if let Some(pairing) = &self.inner.pairing {
            record("pairing", pairing.close().await.map_err(Into::into));
        }
        if let Some(swarm) = &self.inner.swarm {
            record("swarm", swarm.destroy().await.map_err(Into::into));
        }
        record("view", self.inner.log.close_view().await.map_err(Into::into));
        record("log", self.inner.log.close().await.map_err(Into::into));

        debug!(log = %self.key(), failed = errors.len(), "tandem closed");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TandemError::Teardown(errors))
        }
    }
}

impl<V: View> std::fmt::Debug for Tandem<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tandem")
            .field("log", &self.inner.log)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) async fn open_log<V: View>(
    store: &PeerStore,
    view: V,
    mut engine: ApplyEngine<V>,
    config: &TandemConfig,
    options: LogOptions,
) -> Result<Log<V, ApplyEngine<V>>> {
    engine.set_action_errors(config.action_errors);
    Ok(Log::open(store.clone(), view, engine, options).await?)
}

async fn join<V: View>(
    log: &Log<V, ApplyEngine<V>>,
    swarm: &dyn Swarm,
    pairing: &dyn Pairing,
) -> Result<Option<JoinHandle<()>>> {
    swarm.join(log.discovery_key()).await?;
    let handle = pairing.add_member(log.discovery_key())?;
    Ok(Some(spawn_member(log.clone(), handle)))
}
