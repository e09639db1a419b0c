use crate::types::{DeliveryError, Destination, DestinationGateway, Embed, OutboundMessage, RelayError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Channel types that cannot hold messages (voice, category, stage).
const NON_TEXT_CHANNEL_TYPES: [u8; 3] = [2, 4, 13];

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub api_base: String,
    pub timeout_seconds: u64,
}

impl DiscordConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
}

/// Posts to Discord channels over the REST API with a bot token.
pub struct DiscordDestination {
    client: Client,
    config: DiscordConfig,
}

impl DiscordDestination {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(RelayError::Configuration("Discord token is empty".to_string()));
        }

        let client = Client::builder()
            .user_agent("DiscordBot (feed-relay, 0.1)")
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    fn channel_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}", self.config.api_base.trim_end_matches('/'), channel_id)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.config.token)
    }
}

#[async_trait]
impl DestinationGateway for DiscordDestination {
    async fn resolve_destination(&self, channel_id: &str) -> std::result::Result<Destination, DeliveryError> {
        let response = self
            .client
            .get(self.channel_url(channel_id))
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, channel_id));
        }

        let channel: ChannelResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transient(format!("Unreadable channel response: {}", e)))?;

        if NON_TEXT_CHANNEL_TYPES.contains(&channel.kind) {
            return Err(DeliveryError::Permanent(format!("Channel {} is not a text channel", channel.id)));
        }

        Ok(Destination {
            channel_id: channel.id,
            name: channel.name,
        })
    }

    async fn deliver(&self, destination: &Destination, message: &OutboundMessage) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(format!("{}/messages", self.channel_url(&destination.channel_id)))
            .header("Authorization", self.authorization())
            .json(&message_payload(message))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &destination.channel_id));
        }

        debug!("Posted message to channel {}", destination.channel_id);
        Ok(())
    }
}

/// 404 means the channel is gone; other client errors will not change on
/// retry, except rate limiting which is treated like a server error.
fn classify_status(status: StatusCode, channel_id: &str) -> DeliveryError {
    if status == StatusCode::NOT_FOUND {
        DeliveryError::NotFound {
            channel_id: channel_id.to_string(),
        }
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryError::Transient(format!("HTTP {} from channel {}", status.as_u16(), channel_id))
    } else {
        DeliveryError::Permanent(format!("HTTP {} from channel {}", status.as_u16(), channel_id))
    }
}

/// Attachments are re-posted as links; the originals stay hosted where they were.
fn message_payload(message: &OutboundMessage) -> Value {
    let mut content = message.content.clone().unwrap_or_default();
    for attachment in &message.attachments {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&attachment.url);
    }

    let mut payload = json!({
        // Forwarded text must not ping anyone a second time.
        "allowed_mentions": { "parse": [] },
    });
    if !content.is_empty() {
        payload["content"] = Value::String(content);
    }
    if let Some(embed) = &message.embed {
        payload["embeds"] = json!([embed_payload(embed)]);
    }
    payload
}

fn embed_payload(embed: &Embed) -> Value {
    let mut value = json!({ "color": embed.color });
    if let Some(title) = &embed.title {
        value["title"] = json!(title);
    }
    if let Some(url) = &embed.url {
        value["url"] = json!(url);
    }
    if let Some(description) = &embed.description {
        value["description"] = json!(description);
    }
    if let Some(timestamp) = &embed.timestamp {
        value["timestamp"] = json!(timestamp.to_rfc3339());
    }
    if let Some(author) = &embed.author_name {
        value["author"] = json!({ "name": author });
    }
    if let Some(image) = &embed.image_url {
        value["image"] = json!({ "url": image });
    }
    if let Some(footer) = &embed.footer_text {
        let mut footer_value = json!({ "text": footer });
        if let Some(icon) = &embed.footer_icon_url {
            footer_value["icon_url"] = json!(icon);
        }
        value["footer"] = footer_value;
    }
    value
}
