//! Invite-based pairing transport.
//!
//! Two roles: a candidate holds an invite token and asks to be admitted; a
//! member listens for candidates on behalf of a log and, after checking a
//! request against its own invite record, confirms it with the log's keys.
//!
//! Requests carry no routing information beyond the token fingerprint, so
//! every listening member sees every candidate and decides for itself.
//! Requests made before a member starts listening are delivered when it does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use tandem_core::{Blake3Hash, DiscoveryKey, InviteRecord, InviteToken, WriterKey};
use tandem_crypto::{SealedBox, X25519StaticSecret};

use crate::error::{Result, SyncError};
use crate::messages::{ConfirmPayload, PairingRequest};
use crate::network::MemoryNetwork;

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>;

fn take_reply(slot: &ReplySlot) -> Option<oneshot::Sender<Vec<u8>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

fn reply_pending(slot: &ReplySlot) -> bool {
    slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
}

/// Pairing trait: the two admission roles.
#[async_trait]
pub trait Pairing: Send + Sync {
    /// Ask to be admitted with `token`, presenting `user_data` as the writer
    /// key to add.
    fn add_candidate(&self, token: &InviteToken, user_data: WriterKey) -> Result<CandidateHandle>;

    /// Listen for candidates on behalf of the log behind `discovery_key`.
    fn add_member(&self, discovery_key: DiscoveryKey) -> Result<MemberHandle>;

    /// Close every candidate and member made through this pairing.
    async fn close(&self) -> Result<()>;
}

/// Candidate side of a pairing. Dropping it withdraws the request.
pub struct CandidateHandle {
    secret: X25519StaticSecret,
    reply: oneshot::Receiver<Vec<u8>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CandidateHandle {
    /// Wait for a member's confirm.
    ///
    /// Fails with [`SyncError::Cancelled`] if the request is withdrawn first.
    pub async fn confirmed(&mut self) -> Result<ConfirmPayload> {
        let sealed = (&mut self.reply).await.map_err(|_| SyncError::Cancelled)?;
        self.close();
        let plaintext = SealedBox::from_bytes(&sealed)?.open(&self.secret)?;
        ConfirmPayload::from_bytes(&plaintext)
    }

    /// Withdraw the request.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for CandidateHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CandidateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateHandle")
            .field("open", &self.release.is_some())
            .finish()
    }
}

/// Member side of a pairing. Dropping it stops listening.
pub struct MemberHandle {
    discovery_key: DiscoveryKey,
    incoming: mpsc::UnboundedReceiver<IncomingCandidate>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl MemberHandle {
    pub fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    /// The next candidate, or `None` once closed.
    pub async fn next(&mut self) -> Option<IncomingCandidate> {
        self.incoming.recv().await
    }

    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.incoming.close();
    }
}

impl Drop for MemberHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberHandle")
            .field("discovery_key", &self.discovery_key)
            .field("open", &self.release.is_some())
            .finish()
    }
}

/// A candidate request as seen by a member.
#[derive(Clone)]
pub struct IncomingCandidate {
    request: PairingRequest,
    reply: ReplySlot,
}

impl IncomingCandidate {
    pub fn request(&self) -> &PairingRequest {
        &self.request
    }

    pub fn fingerprint(&self) -> &Blake3Hash {
        &self.request.fingerprint
    }

    /// Whether the candidate used `record`'s token.
    pub fn matches(&self, record: &InviteRecord) -> bool {
        self.request.matches(record)
    }

    /// Verify the request against `record` and return the candidate's
    /// writer key.
    pub fn open(&self, record: &InviteRecord) -> Result<WriterKey> {
        self.request.verify(record)
    }

    /// Whether the candidate is still waiting for a confirm.
    pub fn is_pending(&self) -> bool {
        reply_pending(&self.reply)
    }

    /// Seal `payload` to the candidate and deliver it.
    pub fn confirm(&self, payload: &ConfirmPayload) -> Result<()> {
        let sealed = SealedBox::seal(&payload.to_bytes(), &self.request.reply_key)?;
        let reply = take_reply(&self.reply)
            .ok_or_else(|| SyncError::PeerNotConnected("candidate already answered".into()))?;
        reply
            .send(sealed.to_bytes())
            .map_err(|_| SyncError::PeerNotConnected("candidate withdrew".into()))
    }
}

impl std::fmt::Debug for IncomingCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCandidate")
            .field("user_data", &self.request.user_data)
            .field("pending", &self.is_pending())
            .finish()
    }
}

struct MemberSlot {
    tx: mpsc::UnboundedSender<IncomingCandidate>,
}

/// Relay state shared through the network.
#[derive(Default)]
pub(crate) struct PairingRelay {
    next_id: u64,
    candidates: HashMap<u64, IncomingCandidate>,
    members: HashMap<u64, MemberSlot>,
}

impl PairingRelay {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_candidate(&mut self, candidate: IncomingCandidate) -> u64 {
        let id = self.allocate();
        self.members
            .retain(|_, member| member.tx.send(candidate.clone()).is_ok());
        self.candidates.insert(id, candidate);
        id
    }

    fn remove_candidate(&mut self, id: u64) {
        if let Some(candidate) = self.candidates.remove(&id) {
            // Dropping the sender wakes the candidate with Cancelled.
            drop(take_reply(&candidate.reply));
        }
    }

    fn add_member(&mut self, slot: MemberSlot) -> u64 {
        let id = self.allocate();
        for candidate in self.candidates.values().filter(|c| c.is_pending()) {
            let _ = slot.tx.send(candidate.clone());
        }
        self.members.insert(id, slot);
        id
    }

    fn remove_member(&mut self, id: u64) {
        self.members.remove(&id);
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Candidate(u64),
    Member(u64),
}

/// Pairing on a [`MemoryNetwork`].
pub struct MemoryPairing {
    network: MemoryNetwork,
    slots: Mutex<Vec<Slot>>,
    closed: AtomicBool,
}

impl MemoryPairing {
    pub fn new(network: &MemoryNetwork) -> Self {
        Self {
            network: network.clone(),
            slots: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    fn remember(&self, slot: Slot) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(slot);
    }
}

#[async_trait]
impl Pairing for MemoryPairing {
    fn add_candidate(&self, token: &InviteToken, user_data: WriterKey) -> Result<CandidateHandle> {
        self.ensure_open()?;

        let secret = X25519StaticSecret::generate();
        let request = PairingRequest::new(token, user_data, secret.public_key());
        let (tx, rx) = oneshot::channel();
        let candidate = IncomingCandidate {
            request,
            reply: Arc::new(Mutex::new(Some(tx))),
        };

        let id = self.network.relay().add_candidate(candidate);
        self.remember(Slot::Candidate(id));
        debug!(user_data = %user_data, "candidate announced");

        let network = self.network.clone();
        Ok(CandidateHandle {
            secret,
            reply: rx,
            release: Some(Box::new(move || network.relay().remove_candidate(id))),
        })
    }

    fn add_member(&self, discovery_key: DiscoveryKey) -> Result<MemberHandle> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.network.relay().add_member(MemberSlot { tx });
        self.remember(Slot::Member(id));
        debug!(discovery_key = %discovery_key, "member listening");

        let network = self.network.clone();
        Ok(MemberHandle {
            discovery_key,
            incoming: rx,
            release: Some(Box::new(move || network.relay().remove_member(id))),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let slots = std::mem::take(&mut *self.slots.lock().unwrap_or_else(|e| e.into_inner()));
        let mut relay = self.network.relay();
        for slot in slots {
            match slot {
                Slot::Candidate(id) => relay.remove_candidate(id),
                Slot::Member(id) => relay.remove_member(id),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryPairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPairing")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
