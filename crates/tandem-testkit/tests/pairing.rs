//! Invite-based admission between peers.

use std::time::Duration;

use tandem::{PairOptions, PairingPhase, Tandem, TandemError};
use tandem_store::{DriveView, OrderedView};
use tandem_sync::PeerStore;
use tandem_testkit::{eventually, init_tracing, TestNet};

#[tokio::test]
async fn test_candidate_becomes_writer() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(DriveView::new()).await;
    let invite = owner.create_invite().await.unwrap();

    let store = PeerStore::new();
    let peer = net
        .pair_with(
            store.clone(),
            &invite,
            PairOptions::new(DriveView::new(), &net.network),
        )
        .await
        .unwrap();

    assert!(peer.writable());
    assert_eq!(peer.key(), owner.key());
    assert_eq!(peer.encryption_key(), owner.encryption_key());
    assert_eq!(peer.local_writer_key(), store.local_writer().writer_key());
    assert!(owner.writers().await.contains(&peer.local_writer_key()));

    peer.close().await.unwrap();
    owner.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_candidates_are_both_admitted() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(DriveView::new()).await;
    let invite = owner.create_invite().await.unwrap();

    let (a, b) = tokio::join!(
        net.pair(&invite, DriveView::new()),
        net.pair(&invite, DriveView::new()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let writers = owner.writers().await;
    assert!(writers.contains(&a.local_writer_key()));
    assert!(writers.contains(&b.local_writer_key()));
    assert_eq!(writers.len(), 3);

    for tandem in [a, b, owner] {
        tandem.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_invite_is_reusable_and_replicated() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(DriveView::new()).await;
    let invite = owner.create_invite().await.unwrap();

    let first = net.pair(&invite, DriveView::new()).await.unwrap();
    // The paired peer sees the same invite and hands out the same token.
    let (first_ref, invite_ref) = (&first, &invite);
    assert!(
        eventually(|| async move {
            first_ref.create_invite().await.ok().as_ref() == Some(invite_ref)
        })
        .await
    );

    let second = net.pair(&invite, DriveView::new()).await.unwrap();
    assert!(second.writable());

    for tandem in [first, second, owner] {
        tandem.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_pairing_into_ordered_view() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(OrderedView::new()).await;
    let invite = owner.create_invite().await.unwrap();

    let peer = net.pair(&invite, OrderedView::new()).await.unwrap();
    peer.append(serde_json::json!({ "type": "note", "from": "peer" }))
        .await
        .unwrap();

    let owner_ref = &owner;
    assert!(
        eventually(|| async move {
            owner_ref
                .view()
                .await
                .values()
                .iter()
                .any(|v| v["from"] == "peer")
        })
        .await
    );

    peer.close().await.unwrap();
    owner.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_invite_is_rejected_up_front() {
    let net = TestNet::new();
    let result = Tandem::pair(
        PeerStore::new(),
        "definitely-not-z32!",
        PairOptions::new(DriveView::new(), &net.network),
    );
    assert!(matches!(result, Err(TandemError::InvalidInvite(_))));
}

#[tokio::test]
async fn test_deleted_invite_admits_nobody() {
    init_tracing();
    let net = TestNet::new();
    let owner = net.open(DriveView::new()).await;
    let invite = owner.create_invite().await.unwrap();
    owner.delete_invite().await.unwrap();

    let pairer = Tandem::pair(
        PeerStore::new(),
        &invite,
        PairOptions::new(DriveView::new(), &net.network),
    )
    .unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(300), pairer.finished()).await;
    assert!(waited.is_err());
    assert_eq!(pairer.phase(), PairingPhase::AwaitingAdmission);

    pairer.close().await.unwrap();
    assert!(matches!(
        pairer.finished().await,
        Err(TandemError::PairingClosed)
    ));
    assert_eq!(owner.writers().await.len(), 1);
    owner.close().await.unwrap();
}

#[tokio::test]
async fn test_candidate_waits_for_a_member() {
    init_tracing();
    let net = TestNet::new();

    // The owner's log exists but is not on the network yet.
    let store = PeerStore::new();
    let offline = Tandem::open(
        store.clone(),
        tandem::TandemOptions::new(DriveView::new()),
    )
    .await
    .unwrap();
    let invite = offline.create_invite().await.unwrap();
    let (key, encryption_key) = (offline.key(), offline.encryption_key());
    offline.close().await.unwrap();

    let pairer = Tandem::pair(
        PeerStore::new(),
        &invite,
        PairOptions::new(DriveView::new(), &net.network),
    )
    .unwrap();

    // Reopen on the same store, now online.
    let owner = net
        .open_with(
            store,
            tandem::TandemOptions::new(DriveView::new()).with_log(key, encryption_key),
        )
        .await
        .unwrap();

    let peer = tokio::time::timeout(tandem_testkit::SETTLE_TIMEOUT, pairer.finished())
        .await
        .unwrap()
        .unwrap();
    assert!(peer.writable());

    pairer.close().await.unwrap();
    owner.close().await.unwrap();
}
