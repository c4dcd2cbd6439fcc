//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur in the log engine, replication, swarm or pairing.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("core error: {0}")]
    CoreError(#[from] tandem_core::CoreError),

    #[error("crypto error: {0}")]
    CryptoError(#[from] tandem_crypto::CryptoError),

    #[error("store error: {0}")]
    StoreError(#[from] tandem_store::StoreError),

    /// The local writer is not in the log's writer set.
    #[error("log is not writable by the local writer")]
    NotWritable,

    #[error("closed")]
    Closed,

    /// Options that cannot open a log, such as a key without its encryption key.
    #[error("invalid log options: {0}")]
    InvalidOptions(String),

    /// A replicated entry failed verification or does not extend its feed.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    /// The reducer failed on a batch. The log rebuilds on its next update.
    #[error("apply failed: {0}")]
    Apply(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
