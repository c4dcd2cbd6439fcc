//! Peer discovery abstraction.
//!
//! A swarm connects peers that join the same discovery topic. Every
//! connection is handed to the local [`PeerStore`], which replicates over it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use tandem_core::{DiscoveryKey, PeerId};

use crate::error::{Result, SyncError};
use crate::network::{MemoryNetwork, SwarmPeer};
use crate::store::PeerStore;

/// A live link to a remote peer on one topic.
#[derive(Clone)]
pub struct Connection {
    pub remote: PeerId,
    pub topic: DiscoveryKey,
    /// The remote end's store, which replication pulls from.
    pub remote_store: PeerStore,
    closed: watch::Receiver<bool>,
}

impl Connection {
    pub fn new(
        remote: PeerId,
        topic: DiscoveryKey,
        remote_store: PeerStore,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            remote,
            topic,
            remote_store,
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the link closes.
    pub async fn closed(&mut self) {
        while !*self.closed.borrow_and_update() {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote)
            .field("topic", &self.topic)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Swarm trait for topic-based peer discovery.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Swarm: Send + Sync {
    /// This peer's identity on the swarm.
    fn peer_id(&self) -> PeerId;

    /// Announce on `topic` and connect to the peers found there.
    async fn join(&self, topic: DiscoveryKey) -> Result<()>;

    /// Stop announcing on `topic` and drop its connections.
    async fn leave(&self, topic: &DiscoveryKey) -> Result<()>;

    /// Connections as they are made.
    fn connections(&self) -> broadcast::Receiver<Connection>;

    /// Number of live connections.
    fn connection_count(&self) -> usize;

    /// Leave every topic. The swarm cannot be used afterwards.
    async fn destroy(&self) -> Result<()>;
}

/// Swarm on a [`MemoryNetwork`].
pub struct MemorySwarm {
    network: MemoryNetwork,
    peer_id: PeerId,
    store: PeerStore,
    events: broadcast::Sender<Connection>,
    topics: Mutex<HashSet<DiscoveryKey>>,
    destroyed: AtomicBool,
}

impl MemorySwarm {
    /// A swarm whose identity and replication endpoint come from `store`.
    pub fn new(network: &MemoryNetwork, store: PeerStore) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            network: network.clone(),
            peer_id: store.keypair("swarm").peer_id(),
            store,
            events,
            topics: Mutex::new(HashSet::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, HashSet<DiscoveryKey>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Swarm for MemorySwarm {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn join(&self, topic: DiscoveryKey) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        if !self.topics().insert(topic) {
            return Ok(());
        }
        let peer = SwarmPeer {
            store: self.store.clone(),
            events: self.events.clone(),
        };
        self.network.join(topic, self.peer_id, peer);
        Ok(())
    }

    async fn leave(&self, topic: &DiscoveryKey) -> Result<()> {
        if self.topics().remove(topic) {
            self.network.leave(topic, &self.peer_id);
        }
        Ok(())
    }

    fn connections(&self) -> broadcast::Receiver<Connection> {
        self.events.subscribe()
    }

    fn connection_count(&self) -> usize {
        self.network.connection_count(&self.peer_id)
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let topics: Vec<DiscoveryKey> = self.topics().drain().collect();
        for topic in &topics {
            self.network.leave(topic, &self.peer_id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemorySwarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySwarm")
            .field("peer_id", &self.peer_id)
            .field("topics", &self.topics().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::LogKey;

    #[tokio::test]
    async fn test_join_links_both_sides() {
        let network = MemoryNetwork::new();
        let a = MemorySwarm::new(&network, PeerStore::new());
        let b = MemorySwarm::new(&network, PeerStore::new());
        let topic = DiscoveryKey::derive(&LogKey::from_bytes([1; 32]));

        let mut a_events = a.connections();
        let mut b_events = b.connections();
        a.join(topic).await.unwrap();
        b.join(topic).await.unwrap();

        assert_eq!(a_events.recv().await.unwrap().remote, b.peer_id());
        assert_eq!(b_events.recv().await.unwrap().remote, a.peer_id());
        assert_eq!(a.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_closes_connection() {
        let network = MemoryNetwork::new();
        let a = MemorySwarm::new(&network, PeerStore::new());
        let b = MemorySwarm::new(&network, PeerStore::new());
        let topic = DiscoveryKey::derive(&LogKey::from_bytes([2; 32]));

        let mut events = a.connections();
        a.join(topic).await.unwrap();
        b.join(topic).await.unwrap();
        let mut connection = events.recv().await.unwrap();

        b.destroy().await.unwrap();
        connection.closed().await;
        assert!(connection.is_closed());
        assert_eq!(a.connection_count(), 0);
        assert!(matches!(b.join(topic).await, Err(SyncError::Closed)));
    }

    #[tokio::test]
    async fn test_separate_topics_do_not_link() {
        let network = MemoryNetwork::new();
        let a = MemorySwarm::new(&network, PeerStore::new());
        let b = MemorySwarm::new(&network, PeerStore::new());

        a.join(DiscoveryKey::from_bytes([1; 32])).await.unwrap();
        b.join(DiscoveryKey::from_bytes([2; 32])).await.unwrap();
        assert_eq!(a.connection_count(), 0);
    }
}
