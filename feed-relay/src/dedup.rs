use crate::types::{FeedId, Result, StoreError, SubscriptionStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Decides whether a (feed, item) pair has already been delivered.
///
/// All state lives in the store's unique (feed_id, item_id) key, so the answer
/// holds across overlapping ticks and process restarts alike.
#[derive(Clone)]
pub struct DedupTracker {
    store: Arc<dyn SubscriptionStore>,
}

impl DedupTracker {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn is_processed(&self, feed_id: FeedId, item_id: &str) -> Result<bool> {
        Ok(self.store.is_item_processed(feed_id, item_id).await?)
    }

    /// Records a delivery. Recording the same key twice is not an error: a
    /// collision means a concurrent cycle got there first.
    pub async fn mark_processed(&self, feed_id: FeedId, item_id: &str, published_at: Option<DateTime<Utc>>) -> Result<()> {
        match self.store.mark_item_processed(feed_id, item_id, published_at).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(StoreError::AlreadyExists) => {
                debug!("Item {} of feed {} was already marked processed", item_id, feed_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
