use crate::types::{DeliveryError, Destination, DestinationGateway, OutboundMessage};
use async_trait::async_trait;
use tracing::info;

/// Writes deliveries to the log instead of a chat service. Every channel id
/// resolves, which makes it usable for dry runs without credentials.
#[derive(Debug, Default, Clone)]
pub struct ConsoleDestination;

impl ConsoleDestination {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DestinationGateway for ConsoleDestination {
    async fn resolve_destination(&self, channel_id: &str) -> Result<Destination, DeliveryError> {
        if channel_id.trim().is_empty() {
            return Err(DeliveryError::NotFound {
                channel_id: channel_id.to_string(),
            });
        }
        Ok(Destination {
            channel_id: channel_id.to_string(),
            name: None,
        })
    }

    async fn deliver(&self, destination: &Destination, message: &OutboundMessage) -> Result<(), DeliveryError> {
        if let Some(embed) = &message.embed {
            info!(
                channel = %destination.channel_id,
                "[embed] {} <{}> {}",
                embed.title.as_deref().unwrap_or_default(),
                embed.url.as_deref().unwrap_or_default(),
                embed.footer_text.as_deref().unwrap_or_default()
            );
        }
        if let Some(content) = &message.content {
            info!(
                channel = %destination.channel_id,
                attachments = message.attachments.len(),
                "[message] {}",
                content
            );
        }
        Ok(())
    }
}
