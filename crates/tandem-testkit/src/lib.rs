//! # Tandem Testkit
//!
//! Testing utilities for Tandem.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a shared in-process network with helpers to open logs and
//!   pair peers into them
//! - **Generators**: Proptest strategies for operations and keys
//! - **Tracing**: a test subscriber that honours `RUST_LOG`
//!
//! The cross-crate scenarios (pairing, replication, teardown) live in this
//! crate's `tests/` directory.
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use tandem_testkit::fixtures::TestNet;
//! use tandem_store::DriveView;
//!
//! async fn example() {
//!     let net = TestNet::new();
//!     let owner = net.open(DriveView::new()).await;
//!     let invite = owner.create_invite().await.unwrap();
//!     let peer = net.pair(&invite, DriveView::new()).await.unwrap();
//!     assert!(peer.writable());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tandem_testkit::generators::custom_ops;
//!
//! proptest! {
//!     #[test]
//!     fn replicas_agree(ops in custom_ops(16)) {
//!         // apply `ops` on two replicas and compare
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{eventually, multi_party_stores, CountingAction, TestNet, SETTLE_TIMEOUT};
pub use generators::{custom_op, custom_ops, file_write, writer_key};

/// Install a `tracing` subscriber for tests.
///
/// Filters with `RUST_LOG` (default `warn`) and writes through the test
/// harness so output is captured per test. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
