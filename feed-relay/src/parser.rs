use crate::rss_utils::feed::extract_text_from_html;
use crate::types::{FeedError, FeedItem, ParsedFeed};
use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;
use tracing::debug;

/// Normalises RSS, Atom and JSON Feed documents into `ParsedFeed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed(&self, content: &str) -> Result<ParsedFeed, FeedError> {
        debug!("Parsing feed content ({} bytes)", content.len());

        // feed-rs invents an id for entries without one; an invented id would
        // defeat deduplication, so entries keep an empty id instead. The built
        // parser is not Send, so it lives only for this call.
        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
            .parse(content.as_bytes())
            .map_err(|e| FeedError::Parse(e.to_string()))?;

        Ok(Self::convert_feed(feed))
    }

    fn convert_feed(feed: Feed) -> ParsedFeed {
        let title = feed.title.map(|t| t.content);
        let image_url = feed.logo.map(|i| i.uri).or_else(|| feed.icon.map(|i| i.uri));
        let items: Vec<FeedItem> = feed.entries.into_iter().map(Self::convert_entry).collect();

        debug!("Parsed feed with {} entries", items.len());
        ParsedFeed { title, image_url, items }
    }

    fn convert_entry(entry: Entry) -> FeedItem {
        let id = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());
        let link = primary_link(&entry.links);
        let title = entry.title.map(|t| t.content);
        let published_at = entry.published.or(entry.updated);

        // Prefer the summary; fall back to the full body.
        let text_snippet = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|html| extract_text_from_html(&html))
            .filter(|text| !text.is_empty());

        let author = entry.authors.first().map(|a| a.name.clone());

        let image_url = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
            .or_else(|| {
                entry
                    .media
                    .iter()
                    .flat_map(|m| m.thumbnails.iter())
                    .map(|t| t.image.uri.clone())
                    .next()
            });

        FeedItem {
            id,
            link,
            title,
            published_at,
            text_snippet,
            author,
            image_url,
        }
    }

    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();

        content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("\"version\": \"https://jsonfeed.org")
            || content_lower.contains("\"version\":\"https://jsonfeed.org")
    }
}

/// The entry's own page: Atom may list `self` or `replies` links first.
fn primary_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}
