#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_relay::{
    ChannelSelector, DeliveryError, DeliveryLogEntry, Destination, DestinationGateway, FeedError, FeedId, FeedItem,
    FeedSource, FeedSubscription, InboundMessage, KeywordSubscription, MemoryStore, OutboundMessage, ParsedFeed,
    StoreError, SubscriptionStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn item(id: &str, title: &str, published_at: Option<DateTime<Utc>>) -> FeedItem {
    FeedItem {
        id: Some(id.to_string()),
        link: Some(format!("https://example.com/posts/{}", id)),
        title: Some(title.to_string()),
        published_at,
        ..Default::default()
    }
}

pub fn feed(title: &str, items: Vec<FeedItem>) -> ParsedFeed {
    ParsedFeed {
        title: Some(title.to_string()),
        image_url: None,
        items,
    }
}

pub fn message(id: &str, channel_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        guild_id: Some("guild".to_string()),
        author_is_bot: false,
        content: content.to_string(),
        attachments: Vec::new(),
    }
}

/// Feed source serving canned results per URL.
#[derive(Default)]
pub struct ScriptedFeedSource {
    feeds: Mutex<HashMap<String, Result<ParsedFeed, FeedError>>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, feed: ParsedFeed) {
        self.feeds.lock().unwrap().insert(url.to_string(), Ok(feed));
    }

    pub fn fail(&self, url: &str, error: FeedError) {
        self.feeds.lock().unwrap().insert(url.to_string(), Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for ScriptedFeedSource {
    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed, FeedError> {
        *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FeedError::Fetch(format!("HTTP 404 for {}", url))))
    }
}

/// Destination gateway that records every delivery in order.
#[derive(Default)]
pub struct RecordingDestination {
    delivered: Mutex<Vec<(String, OutboundMessage)>>,
    missing: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    resolves: Mutex<usize>,
}

impl RecordingDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel no longer exists.
    pub fn remove_channel(&self, channel_id: &str) {
        self.missing.lock().unwrap().insert(channel_id.to_string());
    }

    /// Deliveries to the channel fail with a transient error.
    pub fn fail_deliveries_to(&self, channel_id: &str) {
        self.failing.lock().unwrap().insert(channel_id.to_string());
    }

    pub fn recover(&self, channel_id: &str) {
        self.failing.lock().unwrap().remove(channel_id);
    }

    pub fn deliveries(&self) -> Vec<(String, OutboundMessage)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<String> {
        self.deliveries().into_iter().map(|(channel, _)| channel).collect()
    }

    /// Embed titles in delivery order.
    pub fn titles(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter_map(|(_, message)| message.embed.and_then(|embed| embed.title))
            .collect()
    }

    pub fn resolve_count(&self) -> usize {
        *self.resolves.lock().unwrap()
    }
}

#[async_trait]
impl DestinationGateway for RecordingDestination {
    async fn resolve_destination(&self, channel_id: &str) -> Result<Destination, DeliveryError> {
        *self.resolves.lock().unwrap() += 1;
        if self.missing.lock().unwrap().contains(channel_id) {
            return Err(DeliveryError::NotFound {
                channel_id: channel_id.to_string(),
            });
        }
        Ok(Destination {
            channel_id: channel_id.to_string(),
            name: Some(format!("channel-{}", channel_id)),
        })
    }

    async fn deliver(&self, destination: &Destination, message: &OutboundMessage) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&destination.channel_id) {
            return Err(DeliveryError::Transient("connection reset".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((destination.channel_id.clone(), message.clone()));
        Ok(())
    }
}

/// How `FaultyStore` answers marker writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerFault {
    /// Another writer inserted the same key first.
    Collision,
    /// The database is unreachable.
    Backend,
}

/// Memory store whose marker writes fail on demand; everything else passes through.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    fault: Mutex<Option<MarkerFault>>,
    mark_attempts: Mutex<usize>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            fault: Mutex::new(None),
            mark_attempts: Mutex::new(0),
        }
    }

    pub fn fail_markers(&self, fault: MarkerFault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    pub fn mark_attempts(&self) -> usize {
        *self.mark_attempts.lock().unwrap()
    }
}

#[async_trait]
impl SubscriptionStore for FaultyStore {
    async fn add_keyword_subscription(
        &self,
        keyword: &str,
        channel_id: &str,
        guild_id: &str,
    ) -> Result<KeywordSubscription, StoreError> {
        self.inner.add_keyword_subscription(keyword, channel_id, guild_id).await
    }

    async fn remove_keyword_subscription(&self, keyword: &str, channel_id: &str, guild_id: &str) -> Result<(), StoreError> {
        self.inner.remove_keyword_subscription(keyword, channel_id, guild_id).await
    }

    async fn list_keyword_subscriptions(&self, guild_id: &str) -> Result<Vec<KeywordSubscription>, StoreError> {
        self.inner.list_keyword_subscriptions(guild_id).await
    }

    async fn add_feed_subscription(
        &self,
        url: &str,
        channel_id: &str,
        guild_id: &str,
        check_interval_minutes: u32,
    ) -> Result<FeedSubscription, StoreError> {
        self.inner
            .add_feed_subscription(url, channel_id, guild_id, check_interval_minutes)
            .await
    }

    async fn remove_feed_subscription(&self, url: &str, channel: &ChannelSelector, guild_id: &str) -> Result<u64, StoreError> {
        self.inner.remove_feed_subscription(url, channel, guild_id).await
    }

    async fn list_feed_subscriptions(&self, guild_id: Option<&str>) -> Result<Vec<FeedSubscription>, StoreError> {
        self.inner.list_feed_subscriptions(guild_id).await
    }

    async fn update_last_checked(&self, feed_id: FeedId, checked_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.update_last_checked(feed_id, checked_at).await
    }

    async fn is_item_processed(&self, feed_id: FeedId, item_id: &str) -> Result<bool, StoreError> {
        self.inner.is_item_processed(feed_id, item_id).await
    }

    async fn mark_item_processed(
        &self,
        feed_id: FeedId,
        item_id: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        *self.mark_attempts.lock().unwrap() += 1;
        let fault = *self.fault.lock().unwrap();
        match fault {
            Some(MarkerFault::Collision) => Err(StoreError::AlreadyExists),
            Some(MarkerFault::Backend) => Err(StoreError::Backend("connection closed".to_string())),
            None => self.inner.mark_item_processed(feed_id, item_id, published_at).await,
        }
    }

    async fn log_delivery(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        self.inner.log_delivery(entry).await
    }
}
