//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tandem::{
    Action, ActionContext, ApplyEngine, PairOptions, Result, Tandem, TandemError, TandemOptions,
};
use tandem_store::View;
use tandem_sync::{MemoryNetwork, PeerStore};

/// How long helpers wait for pairing or replication to settle.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A shared in-process network that peers open and pair on.
#[derive(Debug, Clone, Default)]
pub struct TestNet {
    pub network: MemoryNetwork,
}

impl TestNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log on a fresh peer, listening for candidates.
    pub async fn open<V: View>(&self, view: V) -> Tandem<V> {
        self.open_with(PeerStore::new(), TandemOptions::new(view))
            .await
            .expect("open tandem")
    }

    /// Open on `store` with `options`, attached to this network.
    pub async fn open_with<V: View>(
        &self,
        store: PeerStore,
        options: TandemOptions<V>,
    ) -> Result<Tandem<V>> {
        Tandem::open(store, options.with_network(&self.network)).await
    }

    /// Pair a fresh peer into the log behind `invite`.
    pub async fn pair<V: View>(&self, invite: &str, view: V) -> Result<Tandem<V>> {
        self.pair_with(PeerStore::new(), invite, PairOptions::new(view, &self.network))
            .await
    }

    /// Pair `store` into the log behind `invite`.
    ///
    /// Gives up after [`SETTLE_TIMEOUT`], closing the pairer and returning
    /// [`TandemError::PairingClosed`].
    pub async fn pair_with<V: View>(
        &self,
        store: PeerStore,
        invite: &str,
        options: PairOptions<V>,
    ) -> Result<Tandem<V>> {
        let pairer = Tandem::pair(store, invite, options)?;
        match tokio::time::timeout(SETTLE_TIMEOUT, pairer.finished()).await {
            Ok(result) => result,
            Err(_) => {
                pairer.close().await?;
                Err(TandemError::PairingClosed)
            }
        }
    }
}

/// Stores with deterministic identities for multi-party tests.
pub fn multi_party_stores(count: usize) -> Vec<PeerStore> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            PeerStore::from_seed(seed)
        })
        .collect()
}

/// Poll `check` until it holds or [`SETTLE_TIMEOUT`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A custom action that counts its runs and records what it saw in the view.
#[derive(Debug, Clone, Default)]
pub struct CountingAction {
    runs: Arc<AtomicUsize>,
}

impl CountingAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the action ran, across every engine it is registered on.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// An engine with this action registered for `kind`.
    pub fn engine<V: View>(&self, kind: &str) -> ApplyEngine<V> {
        ApplyEngine::new().with_action(kind, self.clone())
    }
}

#[async_trait]
impl<V: View> Action<V> for CountingAction {
    async fn run(&self, value: &Value, cx: ActionContext<'_, V>) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        cx.view
            .append(json!({ "handled": value.get("type").cloned().unwrap_or(Value::Null) }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_store::{DriveView, OrderedView};

    #[tokio::test]
    async fn test_open_listens_on_network() {
        let net = TestNet::new();
        let tandem = net.open(DriveView::new()).await;

        assert!(tandem.writable());
        assert_eq!(net.network.peers(&tandem.discovery_key()).len(), 1);
        tandem.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_multi_party_stores_are_distinct_and_stable() {
        let stores = multi_party_stores(3);
        let keys: Vec<_> = stores.iter().map(|s| s.local_writer().writer_key()).collect();
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);

        let again = multi_party_stores(3);
        assert_eq!(again[2].local_writer().writer_key(), keys[2]);
    }

    #[tokio::test]
    async fn test_counting_action() {
        let action = CountingAction::new();
        let tandem = Tandem::open(
            PeerStore::new(),
            TandemOptions::new(OrderedView::new()).with_engine(action.engine("ping")),
        )
        .await
        .unwrap();

        tandem.append(json!({ "type": "ping" })).await.unwrap();
        assert_eq!(action.runs(), 1);
        assert_eq!(tandem.view().await.values(), &[json!({ "handled": "ping" })]);
    }

    #[tokio::test]
    async fn test_eventually_times_out() {
        tokio::time::pause();
        assert!(!eventually(|| async { false }).await);
        assert!(eventually(|| async { true }).await);
    }
}
