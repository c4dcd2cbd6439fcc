//! Closing instances and pairers.

use serde_json::json;

use tandem::{PairOptions, PairingPhase, Tandem, TandemError, TandemOptions, INVITE_PATH};
use tandem_store::{DriveView, OrderedView, SqliteDrive, View};
use tandem_sync::PeerStore;
use tandem_testkit::{init_tracing, TestNet};

#[tokio::test]
async fn test_close_releases_network_resources() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(DriveView::new()).await;
    let invite = owner.create_invite().await.unwrap();
    let peer = net.pair(&invite, DriveView::new()).await.unwrap();
    assert_eq!(net.network.peers(&owner.discovery_key()).len(), 2);
    assert_eq!(owner.connection_count(), 1);

    peer.close().await.unwrap();
    assert_eq!(net.network.peers(&owner.discovery_key()).len(), 1);
    assert_eq!(owner.connection_count(), 0);

    owner.close().await.unwrap();
    owner.close().await.unwrap();
    assert!(net.network.peers(&owner.discovery_key()).is_empty());
}

#[tokio::test]
async fn test_closed_instance_rejects_writes() {
    let net = TestNet::new();
    let owner = net.open(OrderedView::new()).await;
    owner.close().await.unwrap();

    assert!(owner.is_closed());
    assert!(owner.append(json!({ "type": "note" })).await.is_err());
    assert!(owner.update().await.is_err());
}

#[tokio::test]
async fn test_closing_pairer_before_admission() {
    let net = TestNet::new();
    let pairer = Tandem::pair(
        PeerStore::new(),
        &tandem::InviteToken::generate().encode(),
        PairOptions::new(DriveView::new(), &net.network),
    )
    .unwrap();

    pairer.close().await.unwrap();
    assert_eq!(pairer.phase(), PairingPhase::Rejected);
    assert!(matches!(
        pairer.finished().await,
        Err(TandemError::PairingClosed)
    ));
    // Closing again is harmless.
    pairer.close().await.unwrap();
}

#[tokio::test]
async fn test_closing_pairer_after_resolution_closes_instance() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(DriveView::new()).await;
    let invite = owner.create_invite().await.unwrap();

    let pairer = Tandem::pair(
        PeerStore::new(),
        &invite,
        PairOptions::new(DriveView::new(), &net.network),
    )
    .unwrap();
    let peer = tokio::time::timeout(tandem_testkit::SETTLE_TIMEOUT, pairer.finished())
        .await
        .unwrap()
        .unwrap();

    pairer.close().await.unwrap();
    assert!(peer.is_closed());
    owner.close().await.unwrap();
}

#[tokio::test]
async fn test_ordered_delete_invite_is_unsupported() {
    let net = TestNet::new();
    let owner = net.open(OrderedView::new()).await;
    owner.create_invite().await.unwrap();

    assert!(matches!(
        owner.delete_invite().await,
        Err(TandemError::UnsupportedOperation(_))
    ));
    owner.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_view_persists_across_close() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drive.db");
    let store = PeerStore::new();

    let first = Tandem::open(
        store.clone(),
        TandemOptions::new(SqliteDrive::open(&path).unwrap()),
    )
    .await
    .unwrap();
    let invite = first.create_invite().await.unwrap();
    first
        .append(json!({ "type": "file", "filename": "notes/a.txt", "blob": "hello" }))
        .await
        .unwrap();
    let (key, encryption_key) = (first.key(), first.encryption_key());
    first.close().await.unwrap();

    let view = SqliteDrive::open(&path).unwrap();
    assert_eq!(view.get("notes/a.txt").await.unwrap().unwrap(), "hello");
    assert!(view.exists(INVITE_PATH).await.unwrap());

    // Reopening rebuilds the same state on top of the persisted view.
    let second = Tandem::open(store, TandemOptions::new(view).with_log(key, encryption_key))
        .await
        .unwrap();
    assert_eq!(second.create_invite().await.unwrap(), invite);
    assert_eq!(second.read_file("notes/a.txt").await.unwrap().unwrap(), "hello");
    second.close().await.unwrap();
}
