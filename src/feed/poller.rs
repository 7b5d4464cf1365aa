use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;

use super::details::{DetailError, DetailFetcher, FeedCounters};
use super::fetcher::{fetch_feed, FeedFetch};
use super::parser::{parse_feed, FeedItem};
use crate::irc::{FactoryClosed, SessionFactory};
use crate::util::{BodyError, REQUEST_TIMEOUT};

pub const DEFAULT_FEED_URL: &str = "http://www.mspaintadventures.com/rss/rss.xml";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// Separator between the story name and the page title in feed titles.
const TITLE_SEPARATOR: &str = " : ";

/// Errors from a single poll cycle.
///
/// `Timeout` and `UnexpectedStatus` are absorbed by [`FeedPoller::poll_once`]
/// and surface as [`PollOutcome::Abandoned`]; the rest are returned.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Request timed out")]
    Timeout,
    #[error("Unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Counting new pages failed: {0}")]
    Details(#[from] DetailError),
    #[error(transparent)]
    SessionUnavailable(#[from] FactoryClosed),
}

/// Everything the poller remembers between cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPollState {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub last_seen_item_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub feed_url: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            interval: DEFAULT_POLL_INTERVAL,
            timeout: REQUEST_TIMEOUT,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    NotModified,
    /// Timed out or got an odd status; nothing changed.
    Abandoned,
    /// First successful poll: newest item remembered, nothing announced.
    ColdStart,
    /// Feed fetched but nothing new in it.
    Unchanged,
    Announced {
        headline: String,
        new_items: usize,
        counters: FeedCounters,
    },
}

/// Which items are new relative to the last one announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDiff {
    ColdStart,
    Unchanged,
    /// New items, newest first.
    New(Vec<FeedItem>),
}

/// Walk `items` (newest first) until the last seen id.
///
/// If the last seen id isn't in the feed any more, every item is new.
pub fn diff_items(last_seen: Option<&str>, items: &[FeedItem]) -> ItemDiff {
    let Some(last_seen) = last_seen else {
        return ItemDiff::ColdStart;
    };

    let new: Vec<FeedItem> = items
        .iter()
        .take_while(|item| item.id != last_seen)
        .cloned()
        .collect();

    if new.is_empty() {
        ItemDiff::Unchanged
    } else {
        ItemDiff::New(new)
    }
}

/// Drop everything up to and including the first `" : "`.
///
/// `"Problem Sleuth : Act 6 Page 12"` becomes `"Act 6 Page 12"`.
pub fn strip_title_prefix(title: &str) -> &str {
    title
        .split_once(TITLE_SEPARATOR)
        .map_or(title, |(_, rest)| rest)
}

/// Watches the feed and announces new pages to whichever session is live.
pub struct FeedPoller {
    client: reqwest::Client,
    config: PollerConfig,
    state: FeedPollState,
    factory: Arc<SessionFactory>,
    details: DetailFetcher,
}

impl FeedPoller {
    pub fn new(client: reqwest::Client, config: PollerConfig, factory: Arc<SessionFactory>) -> Self {
        let details = DetailFetcher::new(client.clone()).with_timeout(config.timeout);
        Self {
            client,
            config,
            state: FeedPollState::default(),
            factory,
            details,
        }
    }

    pub fn state(&self) -> &FeedPollState {
        &self.state
    }

    /// Poll forever. Cycles never overlap; ticks missed while a cycle is
    /// still running (e.g. waiting for a session) are skipped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            feed = %self.config.feed_url,
            interval_secs = self.config.interval.as_secs(),
            "Feed poller started"
        );

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(outcome) => tracing::debug!(feed = %self.config.feed_url, ?outcome, "Poll finished"),
                Err(e) => tracing::warn!(feed = %self.config.feed_url, error = %e, "Poll failed"),
            }
        }
    }

    /// Run one poll cycle.
    ///
    /// State is only committed once the feed has been fetched and parsed.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        let fetched = match fetch_feed(
            &self.client,
            &self.config.feed_url,
            &self.state,
            self.config.timeout,
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(e @ (PollError::Timeout | PollError::UnexpectedStatus(_))) => {
                tracing::warn!(feed = %self.config.feed_url, error = %e, "Abandoning poll");
                return Ok(PollOutcome::Abandoned);
            }
            Err(e) => return Err(e),
        };

        let FeedFetch::Fetched {
            body,
            last_modified,
            etag,
        } = fetched
        else {
            return Ok(PollOutcome::NotModified);
        };

        let items = parse_feed(&body).map_err(|e| PollError::Parse(e.to_string()))?;

        if last_modified.is_some() {
            self.state.last_modified = last_modified;
        }
        if etag.is_some() {
            self.state.etag = etag;
        }

        let diff = diff_items(self.state.last_seen_item_id.as_deref(), &items);
        if let Some(newest) = items.first() {
            self.state.last_seen_item_id = Some(newest.id.clone());
        }

        let new_items = match diff {
            ItemDiff::ColdStart => {
                tracing::info!(
                    feed = %self.config.feed_url,
                    newest = ?self.state.last_seen_item_id,
                    "Recorded newest item"
                );
                return Ok(PollOutcome::ColdStart);
            }
            ItemDiff::Unchanged => return Ok(PollOutcome::Unchanged),
            ItemDiff::New(new_items) => new_items,
        };

        // The item closest to what was last announced leads the batch.
        let Some(lead) = new_items.last() else {
            return Ok(PollOutcome::Unchanged);
        };
        let headline = format!("{} ({})", strip_title_prefix(&lead.title), lead.link);
        tracing::info!(
            feed = %self.config.feed_url,
            title = %lead.title,
            new_items = new_items.len(),
            "New feed items"
        );
        self.announce(&headline).await?;

        let urls: Vec<String> = new_items.iter().map(|item| item.link.clone()).collect();
        let counters = self.details.fetch_counts(&urls).await?;
        if let Some(summary) = counters.summary() {
            self.announce(&summary).await?;
        }

        Ok(PollOutcome::Announced {
            headline,
            new_items: new_items.len(),
            counters,
        })
    }

    /// Say `text` on the current session, waiting for one if needed.
    ///
    /// The wait has no timeout: an announcement is held until a session
    /// registers, however long that takes.
    async fn announce(&self, text: &str) -> Result<(), PollError> {
        loop {
            let session = self.factory.current_or_pending().await?;
            match session.say(text) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(error = %e, "Session closed before announcement, waiting for the next one");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn item(id: &str) -> FeedItem {
        FeedItem {
            id: id.into(),
            link: id.into(),
            title: format!("Homestuck : {id}"),
        }
    }

    #[test]
    fn test_strip_title_prefix() {
        assert_eq!(strip_title_prefix("Problem Sleuth : Act 6 Page 12"), "Act 6 Page 12");
        assert_eq!(strip_title_prefix("Homestuck : a : b"), "a : b");
        assert_eq!(strip_title_prefix("No separator here"), "No separator here");
        assert_eq!(strip_title_prefix("Tight:colon"), "Tight:colon");
    }

    #[test]
    fn test_diff_cold_start() {
        assert_eq!(diff_items(None, &[item("a")]), ItemDiff::ColdStart);
    }

    #[test]
    fn test_diff_unchanged_when_newest_is_last_seen() {
        assert_eq!(diff_items(Some("a"), &[item("a"), item("b")]), ItemDiff::Unchanged);
    }

    #[test]
    fn test_diff_collects_until_last_seen() {
        let items = [item("c"), item("b"), item("a")];
        assert_eq!(
            diff_items(Some("a"), &items),
            ItemDiff::New(vec![item("c"), item("b")])
        );
    }

    #[test]
    fn test_diff_last_seen_gone_means_all_new() {
        let items = [item("c"), item("b")];
        assert_eq!(
            diff_items(Some("a"), &items),
            ItemDiff::New(vec![item("c"), item("b")])
        );
    }

    proptest! {
        #[test]
        fn diff_returns_prefix_before_last_seen(len in 1usize..20, seen in 0usize..25) {
            let items: Vec<FeedItem> = (0..len).map(|i| item(&i.to_string())).collect();
            let last_seen = seen.to_string();
            match diff_items(Some(&last_seen), &items) {
                ItemDiff::ColdStart => prop_assert!(false, "cold start with a last seen id"),
                ItemDiff::Unchanged => prop_assert_eq!(seen, 0),
                ItemDiff::New(new) => {
                    prop_assert_eq!(new.len(), seen.min(len));
                    prop_assert_eq!(&new[..], &items[..new.len()]);
                }
            }
        }
    }
}
