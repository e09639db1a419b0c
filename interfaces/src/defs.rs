use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeliveryError, FeedError, StoreError};

pub type FeedId = Uuid;

pub const DEFAULT_CHECK_INTERVAL_MINUTES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub id: FeedId,
    pub url: String,
    pub channel_id: String,
    pub guild_id: String,
    pub check_interval_minutes: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FeedSubscription {
    /// A feed is due when it was never checked or its interval has fully elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => {
                let interval = Duration::minutes(i64::from(self.check_interval_minutes));
                now.signed_duration_since(last) >= interval
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSubscription {
    pub id: Uuid,
    /// Always stored lower-cased.
    pub keyword: String,
    pub channel_id: String,
    pub guild_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub text_snippet: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

impl FeedItem {
    /// The key used for deduplication: the feed-provided id, falling back to the link.
    /// Items with neither cannot be tracked and must never be delivered.
    pub fn identity(&self) -> Option<&str> {
        non_blank(self.id.as_deref()).or_else(|| non_blank(self.link.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// A chat message observed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub channel_id: String,
    /// `None` for direct messages.
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub author_name: Option<String>,
    pub image_url: Option<String>,
    pub footer_text: Option<String>,
    pub footer_icon_url: Option<String>,
    pub color: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub source_message_id: String,
    pub source_channel_id: String,
    pub destination_channel_id: String,
    pub keyword: String,
    pub guild_id: String,
}

/// Channel filter for feed removal; `Any` drops the feed from every channel of the guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelector {
    Exact(String),
    Any,
}

impl ChannelSelector {
    pub fn matches(&self, channel_id: &str) -> bool {
        match self {
            ChannelSelector::Exact(id) => id == channel_id,
            ChannelSelector::Any => true,
        }
    }
}

/// A resolved destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub channel_id: String,
    pub name: Option<String>,
}

// Collaborator contracts.
//
// The engine only ever talks to these traits, so every implementation is
// expected to be shared behind an `Arc<dyn _>` across tasks.

/// Durable storage for subscriptions, dedup markers and the delivery log.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn add_keyword_subscription(&self, keyword: &str, channel_id: &str, guild_id: &str) -> Result<KeywordSubscription, StoreError>;

    async fn remove_keyword_subscription(&self, keyword: &str, channel_id: &str, guild_id: &str) -> Result<(), StoreError>;

    async fn list_keyword_subscriptions(&self, guild_id: &str) -> Result<Vec<KeywordSubscription>, StoreError>;

    async fn add_feed_subscription(&self, url: &str, channel_id: &str, guild_id: &str, check_interval_minutes: u32) -> Result<FeedSubscription, StoreError>;

    /// Returns the number of subscriptions removed; zero is reported as `NotFound`.
    async fn remove_feed_subscription(&self, url: &str, channel: &ChannelSelector, guild_id: &str) -> Result<u64, StoreError>;

    /// Lists the feeds of one guild, or of every guild when `guild_id` is `None`.
    async fn list_feed_subscriptions(&self, guild_id: Option<&str>) -> Result<Vec<FeedSubscription>, StoreError>;

    async fn update_last_checked(&self, feed_id: FeedId, checked_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn is_item_processed(&self, feed_id: FeedId, item_id: &str) -> Result<bool, StoreError>;

    /// Idempotent. Returns `true` when the marker was newly written.
    async fn mark_item_processed(&self, feed_id: FeedId, item_id: &str, published_at: Option<DateTime<Utc>>) -> Result<bool, StoreError>;

    async fn log_delivery(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError>;
}

/// Delivers rendered messages to chat channels.
#[async_trait]
pub trait DestinationGateway: Send + Sync {
    async fn resolve_destination(&self, channel_id: &str) -> Result<Destination, DeliveryError>;

    async fn deliver(&self, destination: &Destination, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// Fetches a feed by URL and normalises it into `ParsedFeed`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(interval: u32, last_checked: Option<DateTime<Utc>>) -> FeedSubscription {
        FeedSubscription {
            id: Uuid::new_v4(),
            url: "https://example.com/feed.xml".to_string(),
            channel_id: "100".to_string(),
            guild_id: "1".to_string(),
            check_interval_minutes: interval,
            last_checked,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn identity_prefers_id_then_link() {
        let item = FeedItem {
            id: Some("guid-1".to_string()),
            link: Some("https://example.com/a".to_string()),
            ..Default::default()
        };
        assert_eq!(item.identity(), Some("guid-1"));

        let item = FeedItem {
            id: Some("   ".to_string()),
            link: Some("https://example.com/a".to_string()),
            ..Default::default()
        };
        assert_eq!(item.identity(), Some("https://example.com/a"));

        let item = FeedItem {
            title: Some("orphan".to_string()),
            ..Default::default()
        };
        assert_eq!(item.identity(), None);
    }

    #[test]
    fn never_checked_feed_is_due() {
        assert!(subscription(30, None).is_due(Utc::now()));
    }

    #[test]
    fn feed_waits_for_its_interval() {
        let now = Utc::now();
        let feed = subscription(30, Some(now - Duration::minutes(10)));

        assert!(!feed.is_due(now));
        assert!(feed.is_due(now + Duration::minutes(21)));
    }

    #[test]
    fn channel_selector_wildcard() {
        assert!(ChannelSelector::Any.matches("42"));
        assert!(ChannelSelector::Exact("42".to_string()).matches("42"));
        assert!(!ChannelSelector::Exact("42".to_string()).matches("43"));
    }
}
