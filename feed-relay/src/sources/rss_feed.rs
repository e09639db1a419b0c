use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use crate::types::{FeedError, FeedSource, FetchConfig, ParsedFeed, RelayError, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Feed source backed by HTTP fetching and feed-rs parsing.
pub struct HttpFeedSource {
    fetcher: Fetcher,
    parser: FeedParser,
}

impl HttpFeedSource {
    pub fn new(fetch_config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(fetch_config)?,
            parser: FeedParser::new(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_and_parse(&self, url: &str) -> std::result::Result<ParsedFeed, FeedError> {
        let fetched = self.fetcher.fetch(url).await.map_err(|e| match e {
            RelayError::Feed(feed_error) => feed_error,
            other => FeedError::Fetch(other.to_string()),
        })?;
        debug!(
            "Fetched {} in {}ms (HTTP {})",
            fetched.url, fetched.response_time_ms, fetched.http_status
        );

        if !FeedParser::is_valid_feed_content(&fetched.content) {
            warn!("Content at {} does not look like a feed, parsing anyway", url);
        }

        let parsed = self.parser.parse_feed(&fetched.content)?;
        info!("Pulled {} items from feed {}", parsed.items.len(), url);
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn http_source_is_shareable_across_tasks() {
        assert_send_sync::<HttpFeedSource>();

        let source: Arc<dyn FeedSource> = Arc::new(HttpFeedSource::new(FetchConfig::default()).unwrap());
        assert_eq!(Arc::strong_count(&source), 1);
    }
}
