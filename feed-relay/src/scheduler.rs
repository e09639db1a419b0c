use crate::processor::{FeedCheck, FeedProcessor};
use crate::types::{FeedSubscription, RelayConfig, RelayError, SubscriptionStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feeds_total: usize,
    pub feeds_checked: usize,
    pub feeds_not_due: usize,
    pub feeds_failed: usize,
    pub items_delivered: usize,
}

/// Cheap handle used to request an out-of-schedule check.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: mpsc::Sender<()>,
}

impl SchedulerHandle {
    pub fn channel() -> (SchedulerHandle, mpsc::Receiver<()>) {
        let (trigger, receiver) = mpsc::channel(1);
        (SchedulerHandle { trigger }, receiver)
    }

    /// Queues a forced cycle. Requests made while one is already queued are merged.
    pub fn check_now(&self) {
        if self.trigger.try_send(()).is_err() {
            debug!("A forced check is already queued");
        }
    }
}

pub struct FeedScheduler {
    store: Arc<dyn SubscriptionStore>,
    processor: Arc<FeedProcessor>,
    tick_interval: Duration,
    max_concurrent_feeds: usize,
}

impl FeedScheduler {
    pub fn new(store: Arc<dyn SubscriptionStore>, processor: Arc<FeedProcessor>, config: &RelayConfig) -> Self {
        Self {
            store,
            processor,
            tick_interval: config.tick_interval,
            max_concurrent_feeds: config.max_concurrent_feeds.max(1),
        }
    }

    /// Scheduled cycle: each feed is only fetched once its own interval has elapsed.
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle(false).await
    }

    /// Forced cycle: fetches every feed regardless of its interval.
    pub async fn check_now(&self) -> CycleReport {
        self.cycle(true).await
    }

    async fn cycle(&self, force: bool) -> CycleReport {
        let feeds = match self.store.list_feed_subscriptions(None).await {
            Ok(feeds) => feeds,
            Err(e) => {
                error!("Failed to load feed subscriptions: {}", e);
                return CycleReport::default();
            }
        };

        let mut report = CycleReport {
            feeds_total: feeds.len(),
            ..Default::default()
        };
        if feeds.is_empty() {
            return report;
        }

        let now = Utc::now();
        debug!("Checking {} feeds (forced: {})", feeds.len(), force);

        let outcomes: Vec<_> = stream::iter(feeds)
            .map(|feed| async move {
                let outcome = self.processor.process(&feed, now, force).await;
                (feed, outcome)
            })
            .buffer_unordered(self.max_concurrent_feeds)
            .collect()
            .await;

        for (feed, outcome) in outcomes {
            match outcome {
                Ok(FeedCheck::NotDue) => report.feeds_not_due += 1,
                Ok(FeedCheck::Checked(feed_report)) => {
                    report.feeds_checked += 1;
                    report.items_delivered += feed_report.delivered;
                }
                Err(e) => {
                    report.feeds_failed += 1;
                    log_feed_failure(&feed, &e);
                }
            }
        }

        if report.feeds_checked > 0 || report.feeds_failed > 0 {
            info!(
                "Feed cycle finished: {} checked, {} not due, {} failed, {} items delivered",
                report.feeds_checked, report.feeds_not_due, report.feeds_failed, report.items_delivered
            );
        }
        report
    }

    /// Ticks forever; stop it by dropping the future. A slow cycle delays the
    /// next tick instead of piling ticks up. Forced checks requested through a
    /// `SchedulerHandle` run between ticks.
    pub async fn run(&self, mut trigger: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut trigger_open = true;

        info!("Feed scheduler started, ticking every {:?}", self.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                request = trigger.recv(), if trigger_open => match request {
                    Some(()) => {
                        info!("Running requested feed check");
                        self.check_now().await;
                    }
                    None => trigger_open = false,
                },
            }
        }
    }
}

fn log_feed_failure(feed: &FeedSubscription, error: &RelayError) {
    match error {
        RelayError::Feed(_) => warn!("Skipping feed {} this tick: {}", feed.url, error),
        _ => error!("Error processing feed {}: {}", feed.url, error),
    }
}
