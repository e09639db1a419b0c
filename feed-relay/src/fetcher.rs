use crate::types::{FetchConfig, RelayError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub url: String,
    pub content: String,
    pub http_status: u16,
    pub response_time_ms: u64,
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        self.apply_rate_limit(url).await?;

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(url, start_time).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) => {
                    // Oversized feeds will not shrink on retry.
                    if matches!(e, RelayError::FeedTooLarge { .. }) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        Err(last_error.unwrap_or_else(|| RelayError::General(format!("Failed to fetch {}", url))))
    }

    async fn fetch_once(&self, url: &str, start_time: Instant) -> Result<FetchedFeed> {
        let response: Response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(RelayError::General(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        if let Some(content_length) = response.content_length() {
            let size_mb = content_length as usize / (1024 * 1024);
            if size_mb > self.config.max_feed_size_mb {
                return Err(RelayError::FeedTooLarge { size_mb });
            }
        }

        let content = response.text().await?;
        if content.len() / (1024 * 1024) > self.config.max_feed_size_mb {
            return Err(RelayError::FeedTooLarge {
                size_mb: content.len() / (1024 * 1024),
            });
        }

        info!("Fetched feed: {} ({} bytes)", url, content.len());
        Ok(FetchedFeed {
            url: url.to_string(),
            content,
            http_status: status.as_u16(),
            response_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    /// Spaces out requests to the same host; feeds sharing a host are common.
    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);

        // Reserve the slot under the lock, sleep outside it so other hosts are not held up.
        let wait_time = {
            let mut rate_limiter = self.rate_limiter.lock().await;
            let now = Instant::now();
            let next_slot = match rate_limiter.get(&host) {
                Some(last_request) if *last_request + min_interval > now => *last_request + min_interval,
                _ => now,
            };
            rate_limiter.insert(host.clone(), next_slot);
            next_slot - now
        };

        if !wait_time.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        Ok(())
    }
}
