//! In-memory ordered view.
//!
//! The log-like variant: values are appended in apply order and never
//! removed. There is no stable identity to delete by, so `delete` is
//! unsupported.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::traits::{Matcher, View, ViewKind};

/// Append-only sequence of JSON values.
#[derive(Debug, Default)]
pub struct OrderedView {
    entries: Vec<Value>,
    flushed: u64,
    closed: bool,
}

impl OrderedView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length as of the last flush.
    pub fn flushed_len(&self) -> u64 {
        self.flushed
    }

    /// All values, in order.
    pub fn values(&self) -> &[Value] {
        &self.entries
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl View for OrderedView {
    fn kind(&self) -> ViewKind {
        ViewKind::Ordered
    }

    async fn append(&mut self, value: Value) -> Result<u64> {
        self.ensure_open()?;
        self.entries.push(value);
        Ok(self.entries.len() as u64 - 1)
    }

    async fn len(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.entries.len() as u64)
    }

    async fn entry(&self, index: u64) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .cloned())
    }

    async fn find(&self, matcher: &Matcher<'_>) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.entries.iter().find(|v| matcher(v)).cloned())
    }

    async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flushed = self.entries.len() as u64;
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.entries.clear();
        self.flushed = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_find_first_match() {
        let mut view = OrderedView::new();
        assert_eq!(view.append(json!({ "n": 1 })).await.unwrap(), 0);
        assert_eq!(view.append(json!({ "n": 2, "tag": "x" })).await.unwrap(), 1);
        assert_eq!(view.append(json!({ "n": 3, "tag": "x" })).await.unwrap(), 2);

        let found = view.find(&|v: &Value| v.get("tag").is_some()).await.unwrap();
        assert_eq!(found, Some(json!({ "n": 2, "tag": "x" })));
        assert_eq!(view.entry(0).await.unwrap(), Some(json!({ "n": 1 })));
        assert_eq!(view.entry(3).await.unwrap(), None);
        assert_eq!(view.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_find_with_borrowing_matcher() {
        let mut view = OrderedView::new();
        view.append(json!({ "tag": "a" })).await.unwrap();
        view.append(json!({ "tag": "b" })).await.unwrap();

        let wanted = String::from("b");
        let matcher = |v: &Value| v["tag"] == wanted.as_str();
        assert_eq!(view.find(&matcher).await.unwrap(), Some(json!({ "tag": "b" })));
    }

    #[tokio::test]
    async fn test_file_operations_are_unsupported() {
        let mut view = OrderedView::new();
        assert!(matches!(
            view.delete("invite.json").await,
            Err(StoreError::Unsupported(_))
        ));
        assert!(matches!(
            view.put("a", bytes::Bytes::new()).await,
            Err(StoreError::Unsupported(_))
        ));
        assert!(matches!(view.get("a").await, Err(StoreError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_flush_records_durable_length() {
        let mut view = OrderedView::new();
        view.append(json!(1)).await.unwrap();
        assert_eq!(view.flushed_len(), 0);
        view.flush().await.unwrap();
        view.append(json!(2)).await.unwrap();
        assert_eq!(view.flushed_len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_close() {
        let mut view = OrderedView::new();
        view.append(json!(1)).await.unwrap();
        view.clear().await.unwrap();
        assert!(view.is_empty().await.unwrap());

        view.close().await.unwrap();
        assert!(matches!(view.append(json!(2)).await, Err(StoreError::Closed)));
    }
}
