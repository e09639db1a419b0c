use crate::rss_utils::feed::truncate_chars;
use crate::types::{Embed, FeedItem, InboundMessage, OutboundMessage, ParsedFeed};

pub const FEED_EMBED_COLOR: u32 = 0x0099ff;

/// Embed descriptions are capped at 4096 characters by Discord.
pub const MAX_DESCRIPTION_CHARS: usize = 4000;

pub fn render_feed_item(item: &FeedItem, feed: &ParsedFeed) -> OutboundMessage {
    let embed = Embed {
        title: Some(item.title.clone().unwrap_or_else(|| "No Title".to_string())),
        url: item.link.clone(),
        description: item
            .text_snippet
            .as_deref()
            .map(|snippet| truncate_chars(snippet, MAX_DESCRIPTION_CHARS)),
        timestamp: item.published_at,
        author_name: item.author.clone(),
        image_url: item.image_url.clone(),
        footer_text: Some(format!("From {}", feed.title.as_deref().unwrap_or("RSS Feed"))),
        footer_icon_url: feed.image_url.clone(),
        color: FEED_EMBED_COLOR,
    };

    OutboundMessage {
        content: None,
        embed: Some(embed),
        attachments: Vec::new(),
    }
}

/// A forwarded message carries the original text and attachments untouched.
pub fn render_forwarded_message(message: &InboundMessage) -> OutboundMessage {
    OutboundMessage {
        content: Some(message.content.clone()),
        embed: None,
        attachments: message.attachments.clone(),
    }
}
