pub mod types;
pub mod rss_utils;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod store;
pub mod destinations;
pub mod dedup;
pub mod render;
pub mod processor;
pub mod scheduler;
pub mod keyword_router;
pub mod subscriptions;

pub use types::*;
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use sources::HttpFeedSource;
pub use store::{MemoryStore, PgStore};
pub use destinations::{ConsoleDestination, DiscordConfig, DiscordDestination};
pub use dedup::DedupTracker;
pub use processor::{FeedCheck, FeedProcessor, FeedReport};
pub use scheduler::{CycleReport, FeedScheduler, SchedulerHandle};
pub use keyword_router::{DeliveryAttempt, DeliveryOutcome, KeywordRouter};
pub use subscriptions::SubscriptionManager;
