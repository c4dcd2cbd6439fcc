//! Error types for Tandem.

use std::sync::Arc;

use tandem_core::CoreError;
use tandem_store::StoreError;
use tandem_sync::SyncError;
use thiserror::Error;

/// Errors the apply engine surfaces for a batch.
///
/// Any of these fails the whole batch; the log rebuilds on its next update.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The view variant cannot perform the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Storage I/O failure.
    #[error("view I/O failure: {0}")]
    ViewIo(#[source] StoreError),

    /// A built-in operation whose record does not decode.
    #[error("malformed operation: {0}")]
    Malformed(#[from] CoreError),

    /// A registered custom action failed.
    #[error("action {kind:?} failed: {source}")]
    Action {
        kind: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<StoreError> for ApplyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unsupported(what) => ApplyError::Unsupported(what),
            other => ApplyError::ViewIo(other),
        }
    }
}

/// Errors that can occur during Tandem operations.
#[derive(Debug, Error)]
pub enum TandemError {
    /// The pairer was closed before it resolved.
    #[error("pairing closed")]
    PairingClosed,

    /// The invite token does not decode.
    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    /// The view variant cannot perform the operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Storage I/O failure.
    #[error("view I/O failure: {0}")]
    ViewIo(#[source] StoreError),

    /// Any other failure while applying a batch.
    #[error("apply failed: {0}")]
    Apply(#[source] ApplyError),

    /// Log, replication, swarm or pairing error.
    #[error("sync error: {0}")]
    Sync(#[source] SyncError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A pairing attempt was rejected. Shared so every waiter sees the same
    /// cause.
    #[error("pairing failed: {0}")]
    PairingFailed(#[source] Arc<TandemError>),

    /// A background task panicked.
    #[error("background task failed: {0}")]
    Task(String),

    /// Every step of a teardown that failed, in teardown order.
    #[error("teardown failed in {} step(s): {}", .0.len(), join(.0))]
    Teardown(Vec<TandemError>),
}

fn join(errors: &[TandemError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StoreError> for TandemError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unsupported(what) => TandemError::UnsupportedOperation(what),
            other => TandemError::ViewIo(other),
        }
    }
}

impl From<ApplyError> for TandemError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::Unsupported(what) => TandemError::UnsupportedOperation(what),
            ApplyError::ViewIo(source) => TandemError::ViewIo(source),
            other => TandemError::Apply(other),
        }
    }
}

impl From<SyncError> for TandemError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::StoreError(store) => store.into(),
            SyncError::Apply(source) => match source.downcast::<ApplyError>() {
                Ok(apply) => (*apply).into(),
                Err(source) => TandemError::Sync(SyncError::Apply(source)),
            },
            other => TandemError::Sync(other),
        }
    }
}

/// Result type for Tandem operations.
pub type Result<T> = std::result::Result<T, TandemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_errors_surface_through_sync() {
        let sync = SyncError::Apply(Box::new(ApplyError::Unsupported("del-invite".into())));
        assert!(matches!(
            TandemError::from(sync),
            TandemError::UnsupportedOperation(_)
        ));

        let sync = SyncError::Apply(Box::new(ApplyError::ViewIo(StoreError::Closed)));
        assert!(matches!(TandemError::from(sync), TandemError::ViewIo(_)));
    }

    #[test]
    fn test_unsupported_store_error_maps_to_unsupported() {
        let err = TandemError::from(StoreError::Unsupported("delete".into()));
        assert!(matches!(err, TandemError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_teardown_lists_every_step() {
        let err = TandemError::Teardown(vec![
            TandemError::PairingClosed,
            TandemError::Sync(SyncError::Closed),
        ]);
        let message = err.to_string();
        assert!(message.contains("2 step(s)"));
        assert!(message.contains("pairing closed"));
    }
}
