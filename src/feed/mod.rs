//! Webcomic feed watching.
//!
//! - [`parser`] - RSS/Atom parsing into [`FeedItem`]s using the `feed-rs` crate
//! - [`fetcher`] - conditional HTTP GET with cache validators and size limits
//! - [`details`] - per-page content counters for new items
//! - [`poller`] - the poll loop that diffs items and announces new ones
//!
//! # Example
//!
//! ```ignore
//! use theresa::feed::{FeedPoller, PollerConfig};
//!
//! let poller = FeedPoller::new(client, PollerConfig::default(), factory);
//! tokio::spawn(poller.run());
//! ```

pub mod details;
pub mod fetcher;
pub mod parser;
pub mod poller;

pub use details::{count_page, DetailError, DetailFetcher, FeedCounters};
pub use fetcher::{fetch_feed, FeedFetch};
pub use parser::{parse_feed, FeedItem};
pub use poller::{
    diff_items, strip_title_prefix, FeedPollState, FeedPoller, ItemDiff, PollError, PollOutcome,
    PollerConfig, DEFAULT_FEED_URL, DEFAULT_POLL_INTERVAL,
};
