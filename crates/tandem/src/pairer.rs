//! Candidate role: pair into an existing log with an invite.
//!
//! A [`Pairer`] drives one pairing attempt in the background and moves
//! through [`PairingPhase`]s until it resolves with a writable [`Tandem`] or
//! is rejected.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tandem_core::InviteToken;
use tandem_store::View;
use tandem_sync::{
    LogOptions, LogUpdate, MemoryPairing, MemorySwarm, Pairing, PeerStore, ReplicatedLog, Swarm,
    SyncError,
};

use crate::error::{Result, TandemError};
use crate::tandem::{open_log, PairOptions, Tandem};

/// Where a pairing attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPhase {
    Idle,
    /// Setting up the swarm identity.
    AwaitingStore,
    /// Request sent; waiting for a member to confirm it.
    AwaitingAdmission,
    /// Keys received; waiting to see our own admission replicate.
    AwaitingWritable,
    Resolved,
    Rejected,
}

impl PairingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingPhase::Resolved | PairingPhase::Rejected)
    }
}

struct Outcome<V: View> {
    resolved: Option<Tandem<V>>,
    error: Option<Arc<TandemError>>,
}

/// One pairing attempt.
///
/// Dropping the pairer cancels an unresolved attempt.
pub struct Pairer<V: View> {
    phase: watch::Receiver<PairingPhase>,
    cancel: watch::Sender<bool>,
    outcome: Arc<Mutex<Outcome<V>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<V: View> Pairer<V> {
    pub(crate) fn start(store: PeerStore, invite: &str, options: PairOptions<V>) -> Result<Self> {
        let token =
            InviteToken::decode(invite).map_err(|e| TandemError::InvalidInvite(e.to_string()))?;

        let (phase_tx, phase) = watch::channel(PairingPhase::Idle);
        let (cancel, cancelled) = watch::channel(false);
        let outcome = Arc::new(Mutex::new(Outcome {
            resolved: None,
            error: None,
        }));

        let driver = tokio::spawn(drive(
            store,
            token,
            options,
            phase_tx,
            cancelled,
            Arc::clone(&outcome),
        ));

        Ok(Self {
            phase,
            cancel,
            outcome,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn phase(&self) -> PairingPhase {
        *self.phase.borrow()
    }

    /// Wait for the attempt to settle.
    ///
    /// Every call after settling returns the same outcome: the same instance,
    /// or the same rejection.
    pub async fn finished(&self) -> Result<Tandem<V>> {
        let mut phase = self.phase.clone();
        let _ = phase.wait_for(PairingPhase::is_terminal).await;

        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tandem) = &outcome.resolved {
            return Ok(tandem.clone());
        }
        match &outcome.error {
            Some(e) if !matches!(**e, TandemError::PairingClosed) => {
                Err(TandemError::PairingFailed(Arc::clone(e)))
            }
            _ => Err(TandemError::PairingClosed),
        }
    }

    /// Cancel the attempt, or close the instance it resolved with.
    ///
    /// An unresolved attempt is rejected with [`TandemError::PairingClosed`].
    pub async fn close(&self) -> Result<()> {
        let _ = self.cancel.send(true);

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                return Err(TandemError::Task(e.to_string()));
            }
        }

        let resolved = self
            .outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolved
            .clone();
        match resolved {
            Some(tandem) => tandem.close().await,
            None => Ok(()),
        }
    }
}

impl<V: View> std::fmt::Debug for Pairer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pairer")
            .field("phase", &self.phase())
            .finish()
    }
}

async fn drive<V: View>(
    store: PeerStore,
    token: InviteToken,
    options: PairOptions<V>,
    phase: watch::Sender<PairingPhase>,
    mut cancel: watch::Receiver<bool>,
    outcome: Arc<Mutex<Outcome<V>>>,
) {
    let result = pair(store, token, options, &phase, &mut cancel).await;
    let terminal = {
        let mut outcome = outcome.lock().unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(tandem) => {
                outcome.resolved = Some(tandem);
                PairingPhase::Resolved
            }
            Err(e) => {
                debug!(error = %e, "pairing rejected");
                outcome.error = Some(Arc::new(e));
                PairingPhase::Rejected
            }
        }
    };
    phase.send_replace(terminal);
}

async fn pair<V: View>(
    store: PeerStore,
    token: InviteToken,
    options: PairOptions<V>,
    phase: &watch::Sender<PairingPhase>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Tandem<V>> {
    let PairOptions {
        view,
        engine,
        network,
        config,
    } = options;
    // Without replication our own admission would never arrive.
    let config = config.with_replicate(true);

    phase.send_replace(PairingPhase::AwaitingStore);
    if *cancel.borrow() {
        return Err(TandemError::PairingClosed);
    }
    let local = store.local_writer().writer_key();
    let swarm = MemorySwarm::new(&network, store.clone());

    phase.send_replace(PairingPhase::AwaitingAdmission);
    let pairing = MemoryPairing::new(&network);
    let mut candidate = pairing.add_candidate(&token, local)?;
    debug!(writer = %local, fingerprint = ?token.fingerprint(), "pairing request sent");

    let confirmed = tokio::select! {
        confirmed = candidate.confirmed() => confirmed,
        _ = cancelled(cancel) => Err(SyncError::Cancelled),
    };
    drop(candidate);
    pairing.close().await?;
    let payload = confirmed.map_err(|e| match e {
        SyncError::Cancelled => TandemError::PairingClosed,
        other => other.into(),
    })?;
    info!(log = %payload.key, writer = %local, "pairing confirmed");

    phase.send_replace(PairingPhase::AwaitingWritable);
    let log = open_log(
        &store,
        view,
        engine,
        &config,
        LogOptions::existing(payload.key, payload.encryption_key),
    )
    .await?;
    let tandem = Tandem::assemble(
        store,
        log,
        config,
        Some(Box::new(swarm) as Box<dyn Swarm>),
        Some(Box::new(MemoryPairing::new(&network)) as Box<dyn Pairing>),
    )
    .await?;

    let writable = tokio::select! {
        writable = wait_writable(tandem.log()) => writable,
        _ = cancelled(cancel) => Err(TandemError::PairingClosed),
    };
    match writable {
        Ok(()) => {
            info!(log = %tandem.key(), writer = %local, "paired");
            Ok(tandem)
        }
        Err(e) => {
            if let Err(close) = tandem.close().await {
                warn!(error = %close, "closing unpaired instance failed");
            }
            Err(e)
        }
    }
}

/// Resolve once `log` reports us writable.
async fn wait_writable<L: ReplicatedLog>(log: &L) -> Result<()> {
    let mut updates = log.subscribe();
    loop {
        if log.writable() {
            return Ok(());
        }
        match updates.recv().await {
            Ok(LogUpdate { writable: true, .. }) => return Ok(()),
            Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                return Err(TandemError::PairingClosed)
            }
        }
    }
}

/// Resolve once cancellation is requested or the pairer is dropped.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tandem_store::DriveView;
    use tandem_sync::MemoryNetwork;

    #[tokio::test]
    async fn test_invalid_invite_fails_immediately() {
        let network = MemoryNetwork::new();
        let result = Tandem::pair(
            PeerStore::new(),
            "not a token",
            PairOptions::new(DriveView::new(), &network),
        );
        assert!(matches!(result, Err(TandemError::InvalidInvite(_))));
    }

    #[tokio::test]
    async fn test_close_before_admission_rejects() {
        let network = MemoryNetwork::new();
        let token = InviteToken::generate().encode();
        let pairer = Tandem::pair(
            PeerStore::new(),
            &token,
            PairOptions::new(DriveView::new(), &network),
        )
        .unwrap();

        let mut phase = pairer.phase.clone();
        phase
            .wait_for(|p| *p == PairingPhase::AwaitingAdmission)
            .await
            .unwrap();

        pairer.close().await.unwrap();
        assert_eq!(pairer.phase(), PairingPhase::Rejected);
        assert!(matches!(
            pairer.finished().await,
            Err(TandemError::PairingClosed)
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_repeated_to_every_waiter() {
        let (_phase_tx, phase) = watch::channel(PairingPhase::Rejected);
        let (cancel, _cancelled) = watch::channel(false);
        let cause = TandemError::InvalidInvite("wrong log".into());
        let pairer = Pairer::<DriveView> {
            phase,
            cancel,
            outcome: Arc::new(Mutex::new(Outcome {
                resolved: None,
                error: Some(Arc::new(cause)),
            })),
            driver: Mutex::new(None),
        };

        for _ in 0..2 {
            match pairer.finished().await {
                Err(TandemError::PairingFailed(cause)) => {
                    assert!(matches!(*cause, TandemError::InvalidInvite(_)))
                }
                other => panic!("unexpected outcome: {:?}", other.map(|t| t.key())),
            }
        }
        pairer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_pairs_with_member() {
        let network = MemoryNetwork::new();
        let member = Tandem::open(
            PeerStore::new(),
            crate::TandemOptions::new(DriveView::new()).with_network(&network),
        )
        .await
        .unwrap();
        let invite = member.create_invite().await.unwrap();

        let pairer = Tandem::pair(
            PeerStore::new(),
            &invite,
            PairOptions::new(DriveView::new(), &network),
        )
        .unwrap();
        let paired = tokio::time::timeout(Duration::from_secs(5), pairer.finished())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(pairer.phase(), PairingPhase::Resolved);
        assert!(paired.writable());
        assert_eq!(paired.key(), member.key());
        assert!(member.writers().await.contains(&paired.local_writer_key()));

        let again = pairer.finished().await.unwrap();
        assert_eq!(again.local_writer_key(), paired.local_writer_key());

        pairer.close().await.unwrap();
        assert!(paired.is_closed());
        member.close().await.unwrap();
    }
}
