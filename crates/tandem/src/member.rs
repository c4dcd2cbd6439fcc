//! Member role: admit candidates that hold this log's invite.
//!
//! Each candidate is handled in its own task, so several can be admitted at
//! once. An invite is not used up by an admission.

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use tandem_core::{InviteRecord, Operation};
use tandem_store::View;
use tandem_sync::{ConfirmPayload, IncomingCandidate, Log, MemberHandle, ReplicatedLog};

use crate::apply::ApplyEngine;
use crate::error::Result;
use crate::invite::find_invite;

/// Listen on `handle` until it closes or the returned task is aborted.
pub(crate) fn spawn_member<V: View>(
    log: Log<V, ApplyEngine<V>>,
    mut handle: MemberHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut admissions = JoinSet::new();
        loop {
            tokio::select! {
                candidate = handle.next() => {
                    let Some(candidate) = candidate else { break };
                    let log = log.clone();
                    admissions.spawn(async move {
                        let user_data = candidate.request().user_data;
                        if let Err(e) = admit(&log, &candidate).await {
                            warn!(candidate = %user_data, error = %e, "admission failed");
                        }
                    });
                }
                Some(_) = admissions.join_next(), if !admissions.is_empty() => {}
            }
        }
        debug!(discovery_key = %handle.discovery_key(), "member stopped");
    })
}

/// Check `candidate` against the stored invite, add it as a writer and send
/// it the log's keys.
///
/// Returns `Ok(false)` if no stored invite matches.
pub(crate) async fn admit<V: View>(
    log: &Log<V, ApplyEngine<V>>,
    candidate: &IncomingCandidate,
) -> Result<bool> {
    if !candidate.is_pending() {
        return Ok(false);
    }

    let record = {
        let view = log.view().await;
        let matches = |record: &InviteRecord| candidate.matches(record);
        find_invite(&*view, &matches).await?
    };
    let Some(record) = record else {
        debug!(candidate = %candidate.request().user_data, "no matching invite");
        return Ok(false);
    };

    let writer = candidate.open(&record)?;
    log.append(Operation::AddWriter(writer).to_value()).await?;
    candidate.confirm(&ConfirmPayload {
        key: log.key(),
        encryption_key: log.encryption_key(),
    })?;

    info!(writer = %writer, log = %log.key(), "admitted writer");
    Ok(true)
}
