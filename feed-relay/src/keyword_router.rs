//! Keyword forwarding.
//!
//! Every observed message is matched against its guild's keyword subscriptions
//! and forwarded to each matching channel once, synchronously. There is no
//! retry and no persisted in-flight state: a message is routed exactly when it
//! is observed, or not at all.

use crate::render::render_forwarded_message;
use crate::types::{
    DeliveryError, DeliveryLogEntry, DestinationGateway, InboundMessage, KeywordDelivery, KeywordSubscription,
    SubscriptionStore,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The destination is the channel the message came from.
    SkippedOrigin,
    Failed(DeliveryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub channel_id: String,
    pub keywords: Vec<String>,
    pub outcome: DeliveryOutcome,
}

impl DeliveryAttempt {
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

/// A destination together with the keywords that selected it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteTarget {
    channel_id: String,
    keywords: Vec<String>,
}

pub struct KeywordRouter {
    store: Arc<dyn SubscriptionStore>,
    destinations: Arc<dyn DestinationGateway>,
    delivery: KeywordDelivery,
}

impl KeywordRouter {
    pub fn new(store: Arc<dyn SubscriptionStore>, destinations: Arc<dyn DestinationGateway>, delivery: KeywordDelivery) -> Self {
        Self {
            store,
            destinations,
            delivery,
        }
    }

    /// Routes one message. Never fails as a whole; per-destination failures are
    /// reported in the returned attempts.
    pub async fn route(&self, message: &InboundMessage) -> Vec<DeliveryAttempt> {
        // Bot messages include our own forwards; routing them could loop.
        if message.author_is_bot {
            return Vec::new();
        }
        let Some(guild_id) = message.guild_id.as_deref() else {
            return Vec::new();
        };

        let subscriptions = match self.store.list_keyword_subscriptions(guild_id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("Failed to load keywords for guild {}: {}", guild_id, e);
                return Vec::new();
            }
        };
        if subscriptions.is_empty() {
            return Vec::new();
        }

        let targets = match_targets(&message.content, &subscriptions, self.delivery);
        let mut attempts = Vec::with_capacity(targets.len());

        for target in targets {
            let outcome = if target.channel_id == message.channel_id {
                debug!("Not forwarding message {} into its own channel {}", message.id, message.channel_id);
                DeliveryOutcome::SkippedOrigin
            } else {
                match self.forward(message, guild_id, &target).await {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(e) if e.is_permanent() => {
                        error!(
                            "Error forwarding message {} for keyword {} to {}: {}",
                            message.id,
                            target.keywords.join(", "),
                            target.channel_id,
                            e
                        );
                        DeliveryOutcome::Failed(e)
                    }
                    Err(e) => {
                        // Not retried: the message is only routed when it is observed.
                        warn!(
                            "Forwarding message {} to {} failed, dropping it: {}",
                            message.id, target.channel_id, e
                        );
                        DeliveryOutcome::Failed(e)
                    }
                }
            };

            attempts.push(DeliveryAttempt {
                channel_id: target.channel_id,
                keywords: target.keywords,
                outcome,
            });
        }

        let delivered = attempts.iter().filter(|a| a.is_delivered()).count();
        if delivered > 0 {
            info!("Forwarded message {} to {} channel(s)", message.id, delivered);
        }
        attempts
    }

    async fn forward(&self, message: &InboundMessage, guild_id: &str, target: &RouteTarget) -> Result<(), DeliveryError> {
        let destination = self.destinations.resolve_destination(&target.channel_id).await?;
        self.destinations.deliver(&destination, &render_forwarded_message(message)).await?;

        // Audit only; a lost log row must not turn a delivery into a failure.
        for keyword in &target.keywords {
            let entry = DeliveryLogEntry {
                source_message_id: message.id.clone(),
                source_channel_id: message.channel_id.clone(),
                destination_channel_id: target.channel_id.clone(),
                keyword: keyword.clone(),
                guild_id: guild_id.to_string(),
            };
            if let Err(e) = self.store.log_delivery(&entry).await {
                warn!("Failed to log forwarded message {}: {}", message.id, e);
            }
        }

        Ok(())
    }
}

/// Case-insensitive substring matching, in subscription order.
fn match_targets(content: &str, subscriptions: &[KeywordSubscription], delivery: KeywordDelivery) -> Vec<RouteTarget> {
    let content = content.to_lowercase();
    let matches = subscriptions.iter().filter(|s| {
        let keyword = s.keyword.to_lowercase();
        !keyword.is_empty() && content.contains(&keyword)
    });

    let mut targets: Vec<RouteTarget> = Vec::new();
    for subscription in matches {
        let keyword = subscription.keyword.to_lowercase();
        match delivery {
            KeywordDelivery::PerRule => targets.push(RouteTarget {
                channel_id: subscription.channel_id.clone(),
                keywords: vec![keyword],
            }),
            KeywordDelivery::PerDestination => {
                match targets.iter_mut().find(|t| t.channel_id == subscription.channel_id) {
                    Some(target) => target.keywords.push(keyword),
                    None => targets.push(RouteTarget {
                        channel_id: subscription.channel_id.clone(),
                        keywords: vec![keyword],
                    }),
                }
            }
        }
    }
    targets
}
