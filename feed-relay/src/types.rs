use std::time::Duration;

pub use interfaces::{
    Attachment, ChannelSelector, DeliveryError, DeliveryLogEntry, Destination, DestinationGateway, Embed, FeedError,
    FeedId, FeedItem, FeedSource, FeedSubscription, InboundMessage, KeywordSubscription, OutboundMessage, ParsedFeed,
    StoreError, SubscriptionStore, DEFAULT_CHECK_INTERVAL_MINUTES,
};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    pub min_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Feed-Relay/1.0".to_string(),
            timeout_seconds: 30,
            // The scheduler tick is the retry policy unless retries are opted into.
            max_retries: 0,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            max_redirects: 5,
            min_host_interval_ms: 1000,
        }
    }
}

/// How a message matching several keywords that point at the same channel is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum KeywordDelivery {
    /// One delivery per matched subscription; may post the same message twice to one channel.
    PerRule,
    /// One delivery per distinct destination channel.
    #[default]
    PerDestination,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub tick_interval: Duration,
    /// Upper bound on a single feed's fetch, including retries.
    pub fetch_timeout: Duration,
    pub max_concurrent_feeds: usize,
    pub default_check_interval_minutes: u32,
    pub keyword_delivery: KeywordDelivery,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(45),
            max_concurrent_feeds: 4,
            default_check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            keyword_delivery: KeywordDelivery::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    DuplicateSubscription(String),

    #[error("{0}")]
    SubscriptionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
