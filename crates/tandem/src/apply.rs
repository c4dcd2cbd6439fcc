//! The apply engine: the reducer every Tandem log runs.
//!
//! Each merged operation is dispatched in this order:
//!
//! 1. `add-invite`: store the invite record (drive: overwrite `invite.json`;
//!    ordered: append the record)
//! 2. `del-invite`: drive: delete `invite.json`; ordered: unsupported
//! 3. `add-writer` / `remove-writer`: change the writer set
//! 4. a file write on a drive view: store the blob unless the path exists
//! 5. a registered custom action for the operation's `type`
//! 6. otherwise append the value to the view unchanged
//!
//! The view is flushed once per batch. Dispatch never reads the clock, draws
//! randomness or does network I/O: replicas applying the same batches end
//! with the same view.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use tandem_core::{CustomOp, Operation};
use tandem_store::{View, ViewKind};
use tandem_sync::{LogHost, Node, Reducer};

use crate::config::ActionErrorPolicy;
use crate::error::ApplyError;
use crate::invite::{invite_blob, INVITE_PATH};

/// What a custom action gets to work with.
pub struct ActionContext<'a, V> {
    pub view: &'a mut V,
    /// Identity and writer set of the log being applied.
    pub log: &'a mut dyn LogHost,
}

/// A custom operation handler, registered by `type`.
///
/// Runs inside the apply pass, so it must be deterministic: same value and
/// view state in, same view state out, on every replica.
#[async_trait]
pub trait Action<V: View>: Send + Sync + 'static {
    async fn run(&self, value: &Value, cx: ActionContext<'_, V>) -> anyhow::Result<()>;
}

/// Dispatches merged operations onto a view.
pub struct ApplyEngine<V: View> {
    actions: HashMap<String, Arc<dyn Action<V>>>,
    action_errors: ActionErrorPolicy,
}

impl<V: View> ApplyEngine<V> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            action_errors: ActionErrorPolicy::default(),
        }
    }

    /// Register `action` for operations whose `type` is `kind`.
    pub fn with_action(mut self, kind: impl Into<String>, action: impl Action<V>) -> Self {
        self.register(kind, action);
        self
    }

    /// Register `action` for operations whose `type` is `kind`, replacing any
    /// earlier registration.
    pub fn register(&mut self, kind: impl Into<String>, action: impl Action<V>) {
        self.actions.insert(kind.into(), Arc::new(action));
    }

    pub fn has_action(&self, kind: &str) -> bool {
        self.actions.contains_key(kind)
    }

    pub fn action_errors(&self) -> ActionErrorPolicy {
        self.action_errors
    }

    pub fn set_action_errors(&mut self, policy: ActionErrorPolicy) {
        self.action_errors = policy;
    }

    /// Reject a value that would fail dispatch on a `kind` view whatever the
    /// view holds. Checked before a local append so such a value is never
    /// stored.
    pub fn validate(value: &Value, kind: ViewKind) -> Result<(), ApplyError> {
        match (Operation::from_value(value)?, kind) {
            (Operation::DelInvite(_), ViewKind::Ordered) => Err(ApplyError::Unsupported(
                "cannot delete an invite from an ordered view".into(),
            )),
            (Operation::Custom(op), ViewKind::Drive) => {
                op.file()?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Apply one operation.
    pub async fn dispatch(
        &self,
        value: &Value,
        view: &mut V,
        log: &mut dyn LogHost,
    ) -> Result<(), ApplyError> {
        match Operation::from_value(value)? {
            Operation::AddInvite(record) => match view.kind() {
                ViewKind::Drive => view.put(INVITE_PATH, invite_blob(&record)).await?,
                ViewKind::Ordered => {
                    view.append(record.to_json()).await?;
                }
            },
            Operation::DelInvite(_) => match view.kind() {
                ViewKind::Drive => {
                    if !view.delete(INVITE_PATH).await? {
                        debug!("no invite to delete");
                    }
                }
                ViewKind::Ordered => {
                    return Err(ApplyError::Unsupported(
                        "cannot delete an invite from an ordered view".into(),
                    ))
                }
            },
            Operation::AddWriter(key) => {
                if log.add_writer(key) {
                    info!(writer = %key, "writer added");
                }
            }
            Operation::RemoveWriter(key) => {
                if log.remove_writer(&key) {
                    info!(writer = %key, "writer removed");
                }
            }
            Operation::Custom(op) => self.dispatch_custom(op, view, log).await?,
        }
        Ok(())
    }

    async fn dispatch_custom(
        &self,
        op: CustomOp,
        view: &mut V,
        log: &mut dyn LogHost,
    ) -> Result<(), ApplyError> {
        if view.kind() == ViewKind::Drive {
            if let Some(file) = op.file()? {
                if view.exists(&file.path).await? {
                    warn!(path = %file.path, "file already exists, skipping write");
                } else {
                    view.put(&file.path, file.blob).await?;
                }
                return Ok(());
            }
        }

        if let Some(action) = self.actions.get(&op.kind) {
            let cx = ActionContext { view, log };
            if let Err(source) = action.run(&op.value, cx).await {
                match self.action_errors {
                    ActionErrorPolicy::Propagate => {
                        return Err(ApplyError::Action {
                            kind: op.kind,
                            source,
                        })
                    }
                    ActionErrorPolicy::LogAndSkip => {
                        warn!(kind = %op.kind, error = %source, "custom action failed, skipping")
                    }
                }
            }
            return Ok(());
        }

        view.append(op.value).await?;
        Ok(())
    }
}

impl<V: View> Default for ApplyEngine<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: View> std::fmt::Debug for ApplyEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.actions.keys().collect();
        kinds.sort();
        f.debug_struct("ApplyEngine")
            .field("actions", &kinds)
            .field("action_errors", &self.action_errors)
            .finish()
    }
}

#[async_trait]
impl<V: View> Reducer<V> for ApplyEngine<V> {
    type Error = ApplyError;

    async fn apply(
        &self,
        nodes: &[Node],
        view: &mut V,
        host: &mut dyn LogHost,
    ) -> Result<(), ApplyError> {
        for node in nodes {
            self.dispatch(&node.value, view, host).await?;
        }
        view.flush().await?;
        Ok(())
    }
}
