use crate::types::{
    ChannelSelector, DeliveryLogEntry, FeedId, FeedSubscription, KeywordSubscription, StoreError, SubscriptionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    feeds: Vec<FeedSubscription>,
    keywords: Vec<KeywordSubscription>,
    processed: HashMap<(FeedId, String), Option<DateTime<Utc>>>,
    deliveries: Vec<DeliveryLogEntry>,
}

/// In-process store with the same uniqueness rules as the database schema.
/// Nothing survives a restart, so it is meant for tests and demo runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivery_log(&self) -> Vec<DeliveryLogEntry> {
        self.tables.read().await.deliveries.clone()
    }

    pub async fn processed_count(&self, feed_id: FeedId) -> usize {
        self.tables.read().await.processed.keys().filter(|(id, _)| *id == feed_id).count()
    }

    pub async fn feed(&self, feed_id: FeedId) -> Option<FeedSubscription> {
        self.tables.read().await.feeds.iter().find(|f| f.id == feed_id).cloned()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn add_keyword_subscription(
        &self,
        keyword: &str,
        channel_id: &str,
        guild_id: &str,
    ) -> Result<KeywordSubscription, StoreError> {
        let keyword = keyword.to_lowercase();
        let mut tables = self.tables.write().await;

        if tables
            .keywords
            .iter()
            .any(|k| k.keyword == keyword && k.channel_id == channel_id && k.guild_id == guild_id)
        {
            return Err(StoreError::AlreadyExists);
        }

        let subscription = KeywordSubscription {
            id: Uuid::new_v4(),
            keyword,
            channel_id: channel_id.to_string(),
            guild_id: guild_id.to_string(),
            created_at: Utc::now(),
        };
        tables.keywords.push(subscription.clone());
        Ok(subscription)
    }

    async fn remove_keyword_subscription(&self, keyword: &str, channel_id: &str, guild_id: &str) -> Result<(), StoreError> {
        let keyword = keyword.to_lowercase();
        let mut tables = self.tables.write().await;
        let before = tables.keywords.len();

        tables
            .keywords
            .retain(|k| !(k.keyword == keyword && k.channel_id == channel_id && k.guild_id == guild_id));

        if tables.keywords.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_keyword_subscriptions(&self, guild_id: &str) -> Result<Vec<KeywordSubscription>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.keywords.iter().filter(|k| k.guild_id == guild_id).cloned().collect())
    }

    async fn add_feed_subscription(
        &self,
        url: &str,
        channel_id: &str,
        guild_id: &str,
        check_interval_minutes: u32,
    ) -> Result<FeedSubscription, StoreError> {
        let mut tables = self.tables.write().await;

        if tables
            .feeds
            .iter()
            .any(|f| f.url == url && f.channel_id == channel_id && f.guild_id == guild_id)
        {
            return Err(StoreError::AlreadyExists);
        }

        let subscription = FeedSubscription {
            id: Uuid::new_v4(),
            url: url.to_string(),
            channel_id: channel_id.to_string(),
            guild_id: guild_id.to_string(),
            check_interval_minutes,
            last_checked: None,
            created_at: Utc::now(),
        };
        tables.feeds.push(subscription.clone());
        Ok(subscription)
    }

    async fn remove_feed_subscription(&self, url: &str, channel: &ChannelSelector, guild_id: &str) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.feeds.len();

        tables
            .feeds
            .retain(|f| !(f.url == url && f.guild_id == guild_id && channel.matches(&f.channel_id)));

        match (before - tables.feeds.len()) as u64 {
            0 => Err(StoreError::NotFound),
            removed => Ok(removed),
        }
    }

    async fn list_feed_subscriptions(&self, guild_id: Option<&str>) -> Result<Vec<FeedSubscription>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .feeds
            .iter()
            .filter(|f| guild_id.map_or(true, |g| f.guild_id == g))
            .cloned()
            .collect())
    }

    async fn update_last_checked(&self, feed_id: FeedId, checked_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(feed) = tables.feeds.iter_mut().find(|f| f.id == feed_id) {
            feed.last_checked = Some(checked_at);
        }
        Ok(())
    }

    async fn is_item_processed(&self, feed_id: FeedId, item_id: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.processed.contains_key(&(feed_id, item_id.to_string())))
    }

    async fn mark_item_processed(
        &self,
        feed_id: FeedId,
        item_id: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let key = (feed_id, item_id.to_string());

        if tables.processed.contains_key(&key) {
            return Ok(false);
        }
        tables.processed.insert(key, published_at);
        Ok(true)
    }

    async fn log_delivery(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        self.tables.write().await.deliveries.push(entry.clone());
        Ok(())
    }
}
