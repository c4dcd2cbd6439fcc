//! Looking up invite records in a view.
//!
//! A drive view keeps the single invite at [`INVITE_PATH`]. An ordered view
//! keeps every invite ever added, so lookups scan for the first record that
//! satisfies the caller's filter.

use bytes::Bytes;
use serde_json::Value;

use tandem_core::InviteRecord;
use tandem_store::{View, ViewKind};

use crate::error::Result;

/// Where a drive view stores the current invite.
pub const INVITE_PATH: &str = "invite.json";

/// Current wall-clock time in Unix epoch milliseconds.
pub fn unix_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Find a stored invite record accepted by `filter`.
pub async fn find_invite<V: View>(
    view: &V,
    filter: &(dyn Fn(&InviteRecord) -> bool + Send + Sync),
) -> Result<Option<InviteRecord>> {
    match view.kind() {
        ViewKind::Drive => {
            let Some(bytes) = view.get(INVITE_PATH).await? else {
                return Ok(None);
            };
            let record = InviteRecord::from_json_bytes(&bytes)?;
            Ok(filter(&record).then_some(record))
        }
        ViewKind::Ordered => {
            let matcher = |value: &Value| {
                InviteRecord::from_json(value).is_ok_and(|record| filter(&record))
            };
            match view.find(&matcher).await? {
                Some(value) => Ok(Some(InviteRecord::from_json(&value)?)),
                None => Ok(None),
            }
        }
    }
}

/// The invite [`Tandem::create_invite`](crate::Tandem::create_invite) may hand
/// out again: any unexpired record.
pub async fn current_invite<V: View>(view: &V, now_ms: i64) -> Result<Option<InviteRecord>> {
    find_invite(view, &|record: &InviteRecord| !record.is_expired(now_ms)).await
}

/// The record [`Tandem::delete_invite`](crate::Tandem::delete_invite) removes,
/// expired or not.
pub async fn stored_invite<V: View>(view: &V) -> Result<Option<InviteRecord>> {
    find_invite(view, &|_: &InviteRecord| true).await
}

pub(crate) fn invite_blob(record: &InviteRecord) -> Bytes {
    Bytes::from(record.to_json_bytes())
}
