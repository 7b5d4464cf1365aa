use feed_rs::parser;
use sha2::{Digest, Sha256};

/// One entry of the feed, as far as announcements care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Identity used to remember the last announced item.
    pub id: String,
    pub link: String,
    pub title: String,
}

/// Parse RSS/Atom bytes into items, in document order (newest first for
/// the feeds we watch).
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_default();
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty());
            let entry_id = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());

            let id = link
                .clone()
                .or_else(|| entry_id.clone())
                .unwrap_or_else(|| fallback_id(&title));
            let link = link.or(entry_id).unwrap_or_default();

            FeedItem { id, link, title }
        })
        .collect();

    Ok(items)
}

fn fallback_id(title: &str) -> String {
    let hash = Sha256::digest(title.as_bytes());
    format!("{:x}", hash)
}
