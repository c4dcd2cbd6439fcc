//! # Tandem Sync
//!
//! The replicated multi-writer log and the substrate it runs on.
//!
//! ## Overview
//!
//! Every peer keeps a [`PeerStore`] holding one feed per writer for each log
//! it has opened. A [`Log`] merges those feeds into one deterministic order
//! and applies it to a view through a [`Reducer`]. Peers find each other on a
//! [`Swarm`] and replicate entries store-to-store; new writers are admitted
//! through [`Pairing`].
//!
//! ## Key Properties
//!
//! - **Deterministic**: replicas holding the same entries apply the same order
//! - **Blind replication**: stores copy ciphertext; only key holders can apply
//! - **Self-healing**: a reordered or failed merge rebuilds the view from scratch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tandem_sync::{Log, LogOptions, MemoryNetwork, MemorySwarm, PeerStore, ReplicatedLog, Swarm};
//!
//! async fn example<V: tandem_store::View, R: tandem_sync::Reducer<V>>(view: V, reducer: R) {
//!     let network = MemoryNetwork::new();
//!     let store = PeerStore::new();
//!     let log = Log::open(store.clone(), view, reducer, LogOptions::default()).await.unwrap();
//!
//!     let swarm = MemorySwarm::new(&network, store);
//!     swarm.join(log.discovery_key()).await.unwrap();
//!
//!     log.append(serde_json::json!({ "type": "note" })).await.unwrap();
//! }
//! ```
//!
//! ## Pairing Flow
//!
//! ```text
//! Candidate                           Member
//!   |-------- PairingRequest --------->|  fingerprint, user_data, reply_key, proof
//!   |                                  |  verify against invite record
//!   |                                  |  append add-writer(user_data)
//!   |<------- sealed ConfirmPayload ---|  log key + encryption key
//! ```

pub mod convergence;
pub mod error;
pub mod log;
pub mod messages;
pub mod network;
pub mod pairing;
pub mod store;
pub mod swarm;
pub mod traits;

pub use convergence::{compute_log_state_hash, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use log::{Log, LogOptions};
pub use messages::{ConfirmPayload, PairingRequest, PAIRING_VERSION};
pub use network::MemoryNetwork;
pub use pairing::{CandidateHandle, IncomingCandidate, MemberHandle, MemoryPairing, Pairing};
pub use store::PeerStore;
pub use swarm::{Connection, MemorySwarm, Swarm};
pub use traits::{LogHost, LogUpdate, Node, Reducer, ReplicatedLog};
