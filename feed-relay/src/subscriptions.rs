use crate::rss_utils::{channel::normalize_channel_id, time::format_duration, url as url_utils};
use crate::types::{
    ChannelSelector, DeliveryError, DestinationGateway, FeedSource, FeedSubscription, KeywordSubscription, RelayError,
    Result, StoreError, SubscriptionStore, DEFAULT_CHECK_INTERVAL_MINUTES,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Upper bound for a feed check interval: one week.
pub const MAX_CHECK_INTERVAL_MINUTES: u32 = 7 * 24 * 60;

/// Validated front door for tenant commands. Input is checked before
/// anything is written, so a rejected command leaves the store untouched.
pub struct SubscriptionManager {
    store: Arc<dyn SubscriptionStore>,
    source: Arc<dyn FeedSource>,
    destinations: Arc<dyn DestinationGateway>,
    default_interval_minutes: u32,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        source: Arc<dyn FeedSource>,
        destinations: Arc<dyn DestinationGateway>,
    ) -> Self {
        Self {
            store,
            source,
            destinations,
            default_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
        }
    }

    pub fn with_default_interval(mut self, minutes: u32) -> Self {
        if (1..=MAX_CHECK_INTERVAL_MINUTES).contains(&minutes) {
            self.default_interval_minutes = minutes;
        }
        self
    }

    pub async fn add_feed(
        &self,
        url: &str,
        channel: &str,
        guild_id: &str,
        interval_minutes: Option<u32>,
    ) -> Result<FeedSubscription> {
        let url = url.trim();
        if !url_utils::is_valid_rss_url(url) {
            return Err(RelayError::Configuration(format!("Not an http(s) feed URL: {}", url)));
        }
        let channel_id = required_channel(channel)?;
        let guild_id = required_guild(guild_id)?;
        let interval = match interval_minutes {
            Some(0) => return Err(RelayError::Configuration("Check interval must be at least one minute".to_string())),
            Some(minutes) if minutes > MAX_CHECK_INTERVAL_MINUTES => {
                return Err(RelayError::Configuration(format!(
                    "Check interval must be at most {} minutes",
                    MAX_CHECK_INTERVAL_MINUTES
                )))
            }
            Some(minutes) => minutes,
            None => self.default_interval_minutes,
        };

        self.ensure_destination(&channel_id).await?;

        // A feed that cannot be read now is almost always a typo.
        let feed = self.source.fetch_and_parse(url).await?;

        let subscription = self
            .store
            .add_feed_subscription(url, &channel_id, &guild_id, interval)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => RelayError::DuplicateSubscription(format!(
                    "{} is already posted to channel {}",
                    url, channel_id
                )),
                other => other.into(),
            })?;

        info!(
            "Subscribed channel {} to {} ({}, {} items, every {}m)",
            channel_id,
            url,
            feed.title.as_deref().unwrap_or("untitled"),
            feed.items.len(),
            interval
        );
        Ok(subscription)
    }

    /// Without a channel the feed is removed from every channel of the guild.
    pub async fn remove_feed(&self, url: &str, channel: Option<&str>, guild_id: &str) -> Result<u64> {
        let guild_id = required_guild(guild_id)?;
        let selector = match channel {
            Some(channel) => ChannelSelector::Exact(required_channel(channel)?),
            None => ChannelSelector::Any,
        };

        let removed = self
            .store
            .remove_feed_subscription(url.trim(), &selector, &guild_id)
            .await
            .map_err(|e| not_found_as(e, format!("No subscription to {} in this server", url.trim())))?;
        if removed == 0 {
            return Err(RelayError::SubscriptionNotFound(format!(
                "No subscription to {} in this server",
                url.trim()
            )));
        }

        info!("Removed {} subscription(s) to {}", removed, url.trim());
        Ok(removed)
    }

    pub async fn list_feeds(&self, guild_id: &str) -> Result<Vec<FeedSubscription>> {
        let guild_id = required_guild(guild_id)?;
        Ok(self.store.list_feed_subscriptions(Some(&guild_id)).await?)
    }

    pub async fn add_keyword(&self, keyword: &str, channel: &str, guild_id: &str) -> Result<KeywordSubscription> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Err(RelayError::Configuration("Keyword must not be empty".to_string()));
        }
        let channel_id = required_channel(channel)?;
        let guild_id = required_guild(guild_id)?;

        self.ensure_destination(&channel_id).await?;

        let subscription = self
            .store
            .add_keyword_subscription(&keyword, &channel_id, &guild_id)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => RelayError::DuplicateSubscription(format!(
                    "Keyword \"{}\" is already forwarded to channel {}",
                    keyword, channel_id
                )),
                other => other.into(),
            })?;

        info!("Forwarding keyword \"{}\" to channel {}", keyword, channel_id);
        Ok(subscription)
    }

    pub async fn remove_keyword(&self, keyword: &str, channel: &str, guild_id: &str) -> Result<()> {
        let keyword = keyword.trim().to_lowercase();
        let channel_id = required_channel(channel)?;
        let guild_id = required_guild(guild_id)?;

        self.store
            .remove_keyword_subscription(&keyword, &channel_id, &guild_id)
            .await
            .map_err(|e| not_found_as(e, format!("Keyword \"{}\" is not forwarded to channel {}", keyword, channel_id)))?;

        info!("Stopped forwarding keyword \"{}\" to channel {}", keyword, channel_id);
        Ok(())
    }

    pub async fn list_keywords(&self, guild_id: &str) -> Result<Vec<KeywordSubscription>> {
        let guild_id = required_guild(guild_id)?;
        Ok(self.store.list_keyword_subscriptions(&guild_id).await?)
    }

    async fn ensure_destination(&self, channel_id: &str) -> Result<()> {
        match self.destinations.resolve_destination(channel_id).await {
            Ok(_) => Ok(()),
            Err(DeliveryError::NotFound { .. }) => {
                Err(RelayError::Configuration(format!("Channel {} does not exist", channel_id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// One line per feed for listings.
pub fn describe_feed(feed: &FeedSubscription, now: DateTime<Utc>) -> String {
    let host = url_utils::extract_domain(&feed.url).unwrap_or_else(|| feed.url.clone());
    let checked = match feed.last_checked {
        Some(at) => format!("checked {} ago", format_duration(now - at)),
        None => "never checked".to_string(),
    };
    format!(
        "[{}] {} -> <#{}> every {}m, {}",
        host, feed.url, feed.channel_id, feed.check_interval_minutes, checked
    )
}

fn required_channel(raw: &str) -> Result<String> {
    let channel_id = normalize_channel_id(raw);
    if channel_id.is_empty() {
        return Err(RelayError::Configuration("Channel is required".to_string()));
    }
    Ok(channel_id)
}

fn required_guild(raw: &str) -> Result<String> {
    let guild_id = raw.trim();
    if guild_id.is_empty() {
        return Err(RelayError::Configuration("Server id is required".to_string()));
    }
    Ok(guild_id.to_string())
}

fn not_found_as(error: StoreError, message: String) -> RelayError {
    match error {
        StoreError::NotFound => RelayError::SubscriptionNotFound(message),
        other => other.into(),
    }
}
