//! Configuration for Tandem.

use std::time::Duration;

use tandem_core::INVITE_TTL_MS;

/// What the apply engine does when a custom action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionErrorPolicy {
    /// Fail the batch.
    #[default]
    Propagate,
    /// Log a warning and carry on with the next operation.
    LogAndSkip,
}

/// Configuration for a Tandem instance.
#[derive(Debug, Clone)]
pub struct TandemConfig {
    /// Join the swarm and listen for candidates when a network is given.
    pub replicate: bool,
    /// Lifetime of newly created invites.
    pub invite_ttl: Duration,
    pub action_errors: ActionErrorPolicy,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            replicate: true,
            invite_ttl: Duration::from_millis(INVITE_TTL_MS as u64),
            action_errors: ActionErrorPolicy::default(),
        }
    }
}

impl TandemConfig {
    pub fn with_replicate(mut self, replicate: bool) -> Self {
        self.replicate = replicate;
        self
    }

    pub fn with_invite_ttl(mut self, ttl: Duration) -> Self {
        self.invite_ttl = ttl;
        self
    }

    pub fn with_action_errors(mut self, policy: ActionErrorPolicy) -> Self {
        self.action_errors = policy;
        self
    }

    pub(crate) fn invite_ttl_ms(&self) -> i64 {
        i64::try_from(self.invite_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}
