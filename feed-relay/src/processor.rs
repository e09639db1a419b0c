use crate::dedup::DedupTracker;
use crate::render::render_feed_item;
use crate::types::{
    DeliveryError, Destination, DestinationGateway, FeedError, FeedItem, FeedSource, FeedSubscription, Result,
    SubscriptionStore,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters for one feed's cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub items_seen: usize,
    pub delivered: usize,
    pub already_processed: usize,
    pub skipped_without_identity: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCheck {
    /// The feed's own interval has not elapsed since its last check.
    NotDue,
    Checked(FeedReport),
}

/// Runs fetch, filter, deliver, mark and checkpoint for one subscription.
pub struct FeedProcessor {
    store: Arc<dyn SubscriptionStore>,
    source: Arc<dyn FeedSource>,
    destinations: Arc<dyn DestinationGateway>,
    dedup: DedupTracker,
    fetch_timeout: Duration,
}

impl FeedProcessor {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn FeedSource>,
        destinations: Arc<dyn DestinationGateway>,
        fetch_timeout: Duration,
    ) -> Self {
        let dedup = DedupTracker::new(store.clone());
        Self {
            store,
            source,
            destinations,
            dedup,
            fetch_timeout,
        }
    }

    /// Processes one subscription. `force` skips the interval check.
    ///
    /// Fetch and parse failures, and persistence failures other than marker
    /// collisions, abort the cycle with the checkpoint left untouched. Delivery
    /// failures only skip the affected item, which stays unmarked for the next tick.
    pub async fn process(&self, subscription: &FeedSubscription, now: DateTime<Utc>, force: bool) -> Result<FeedCheck> {
        if !force && !subscription.is_due(now) {
            debug!(
                "Feed {} not due yet (interval {}m, last checked {:?})",
                subscription.url, subscription.check_interval_minutes, subscription.last_checked
            );
            return Ok(FeedCheck::NotDue);
        }

        let mut feed = match tokio::time::timeout(self.fetch_timeout, self.source.fetch_and_parse(&subscription.url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FeedError::Timeout {
                    seconds: self.fetch_timeout.as_secs(),
                }
                .into())
            }
        };

        let items = chronological(std::mem::take(&mut feed.items));
        let mut report = FeedReport {
            items_seen: items.len(),
            ..Default::default()
        };
        let mut destination: Option<std::result::Result<Destination, DeliveryError>> = None;

        for item in &items {
            let Some(item_id) = item.identity() else {
                debug!("Skipping item without id or link in feed {}: {:?}", subscription.url, item.title);
                report.skipped_without_identity += 1;
                continue;
            };

            if self.dedup.is_processed(subscription.id, item_id).await? {
                report.already_processed += 1;
                continue;
            }

            if destination.is_none() {
                let resolved = self.destinations.resolve_destination(&subscription.channel_id).await;
                if let Err(e) = &resolved {
                    error!("Channel {} not available for feed {}: {}", subscription.channel_id, subscription.url, e);
                }
                destination = Some(resolved);
            }
            let Some(Ok(target)) = destination.as_ref() else {
                report.failed += 1;
                continue;
            };

            let message = render_feed_item(item, &feed);
            if let Err(e) = self.destinations.deliver(target, &message).await {
                if e.is_permanent() {
                    error!("Channel {} rejected item {} of feed {}: {}", subscription.channel_id, item_id, subscription.url, e);
                } else {
                    warn!("Failed to deliver item {} of feed {}, retrying next check: {}", item_id, subscription.url, e);
                }
                report.failed += 1;
                continue;
            }

            self.dedup.mark_processed(subscription.id, item_id, item.published_at).await?;
            report.delivered += 1;
        }

        self.store.update_last_checked(subscription.id, now).await?;

        if report.delivered > 0 || report.failed > 0 {
            info!(
                "Feed {}: {} items, {} delivered, {} failed",
                subscription.url, report.items_seen, report.delivered, report.failed
            );
        }

        Ok(FeedCheck::Checked(report))
    }
}

/// Oldest first. Feeds usually list newest first, so document order is
/// reversed before a stable sort on the publish time; undated items stay
/// in that reversed order ahead of dated ones.
pub fn chronological(mut items: Vec<FeedItem>) -> Vec<FeedItem> {
    items.reverse();
    items.sort_by_key(|item| item.published_at);
    items
}
