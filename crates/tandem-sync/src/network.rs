//! In-process network shared by swarms and pairing.
//!
//! Peers that join the same topic are linked pairwise. Each link hands a
//! [`Connection`] to both peers' stores, which replicate over it until the
//! link closes. The pairing relay lives here too so that candidates and
//! members on the same network can find each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tracing::debug;

use tandem_core::{DiscoveryKey, PeerId};

use crate::pairing::PairingRelay;
use crate::store::PeerStore;
use crate::swarm::Connection;

/// A peer's registration on a topic.
#[derive(Clone)]
pub(crate) struct SwarmPeer {
    pub store: PeerStore,
    pub events: broadcast::Sender<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LinkId {
    topic: DiscoveryKey,
    low: PeerId,
    high: PeerId,
}

impl LinkId {
    fn new(topic: DiscoveryKey, a: PeerId, b: PeerId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self { topic, low, high }
    }

    fn involves(&self, peer: &PeerId) -> bool {
        self.low == *peer || self.high == *peer
    }
}

/// Shared state for the memory network.
///
/// Cheap to clone; clones are the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    topics: Mutex<HashMap<DiscoveryKey, HashMap<PeerId, SwarmPeer>>>,
    links: Mutex<HashMap<LinkId, watch::Sender<bool>>>,
    relay: Mutex<PairingRelay>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryNetwork {
    /// Create a new memory network.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn relay(&self) -> MutexGuard<'_, PairingRelay> {
        lock(&self.inner.relay)
    }

    /// Add `peer` to `topic` and link it with everyone already there.
    ///
    /// Returns the number of links created.
    pub(crate) fn join(&self, topic: DiscoveryKey, peer: PeerId, member: SwarmPeer) -> usize {
        let others: Vec<(PeerId, SwarmPeer)> = {
            let mut topics = lock(&self.inner.topics);
            let peers = topics.entry(topic).or_default();
            if peers.contains_key(&peer) {
                return 0;
            }
            let others = peers
                .iter()
                .map(|(id, other)| (*id, other.clone()))
                .collect();
            peers.insert(peer, member.clone());
            others
        };

        for (other_id, other) in &others {
            self.link(topic, peer, &member, *other_id, other);
        }
        debug!(topic = %topic, peer = %peer, links = others.len(), "joined topic");
        others.len()
    }

    fn link(
        &self,
        topic: DiscoveryKey,
        a: PeerId,
        a_peer: &SwarmPeer,
        b: PeerId,
        b_peer: &SwarmPeer,
    ) {
        let (closer, closed) = watch::channel(false);
        lock(&self.inner.links).insert(LinkId::new(topic, a, b), closer);

        let to_b = Connection::new(b, topic, b_peer.store.clone(), closed.clone());
        let to_a = Connection::new(a, topic, a_peer.store.clone(), closed);

        a_peer.store.replicate(to_b.clone());
        let _ = a_peer.events.send(to_b);
        b_peer.store.replicate(to_a.clone());
        let _ = b_peer.events.send(to_a);
    }

    /// Remove `peer` from `topic`, closing its links there.
    pub(crate) fn leave(&self, topic: &DiscoveryKey, peer: &PeerId) {
        {
            let mut topics = lock(&self.inner.topics);
            if let Some(peers) = topics.get_mut(topic) {
                peers.remove(peer);
                if peers.is_empty() {
                    topics.remove(topic);
                }
            }
        }

        let mut links = lock(&self.inner.links);
        let closing: Vec<LinkId> = links
            .keys()
            .filter(|link| link.topic == *topic && link.involves(peer))
            .copied()
            .collect();
        for link in closing {
            if let Some(closer) = links.remove(&link) {
                let _ = closer.send(true);
            }
        }
        debug!(topic = %topic, peer = %peer, "left topic");
    }

    /// Number of open links `peer` takes part in.
    pub fn connection_count(&self, peer: &PeerId) -> usize {
        lock(&self.inner.links)
            .keys()
            .filter(|link| link.involves(peer))
            .count()
    }

    /// Peers currently on `topic`.
    pub fn peers(&self, topic: &DiscoveryKey) -> Vec<PeerId> {
        lock(&self.inner.topics)
            .get(topic)
            .map(|peers| peers.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("topics", &lock(&self.inner.topics).len())
            .field("links", &lock(&self.inner.links).len())
            .finish()
    }
}
