//! Per-page content counters for newly announced comic pages.

use std::ops::Add;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::util::{read_limited_bytes, BodyError, REQUEST_TIMEOUT};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Marker for story assets; images and flashes elsewhere are site chrome.
const STORY_ASSET: &str = "storyfiles";

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| unreachable!("static selector {css:?}: {e}"))
}

static SPOILER_PARAGRAPHS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"div[class="spoiler"] p"#));
static STORY_PARAGRAPHS: LazyLock<Selector> =
    LazyLock::new(|| selector(r##"td[bgcolor="#EEEEEE"] center > p"##));
static STORY_IMAGES: LazyLock<Selector> =
    LazyLock::new(|| selector(r##"td[bgcolor="#EEEEEE"] img[src]"##));
static STORY_SCRIPTS: LazyLock<Selector> =
    LazyLock::new(|| selector(r##"td[bgcolor="#EEEEEE"] script[src]"##));

#[derive(Debug, Error)]
pub enum DetailError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Body(#[from] BodyError),
}

/// Tally of what a batch of pages contained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCounters {
    pub pesterlines: u64,
    pub paragraphs: u64,
    pub images: u64,
    pub flashes: u64,
    pub pages: u64,
}

impl FeedCounters {
    /// Counters in reporting order.
    pub fn entries(&self) -> [(&'static str, u64); 5] {
        [
            ("pesterlines", self.pesterlines),
            ("paragraphs", self.paragraphs),
            ("images", self.images),
            ("flashes", self.flashes),
            ("pages", self.pages),
        ]
    }

    /// `new: 12 pesterlines; 1 pages`, or `None` when everything is zero.
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, count)| format!("{count} {name}"))
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(format!("new: {}", parts.join("; ")))
        }
    }
}

impl Add for FeedCounters {
    type Output = FeedCounters;

    fn add(self, other: FeedCounters) -> FeedCounters {
        FeedCounters {
            pesterlines: self.pesterlines + other.pesterlines,
            paragraphs: self.paragraphs + other.paragraphs,
            images: self.images + other.images,
            flashes: self.flashes + other.flashes,
            pages: self.pages + other.pages,
        }
    }
}

/// Count one page's content.
pub fn count_page(html: &str) -> FeedCounters {
    let doc = Html::parse_document(html);

    let pesterlines = doc
        .select(&SPOILER_PARAGRAPHS)
        .flat_map(|p| p.text())
        .filter(|t| !t.trim().is_empty())
        .count();

    let paragraphs = doc
        .select(&STORY_PARAGRAPHS)
        .flat_map(|p| p.children().filter_map(|node| node.value().as_text()))
        .filter(|t| !t.trim().is_empty())
        .count();

    FeedCounters {
        pesterlines: pesterlines as u64,
        paragraphs: paragraphs as u64,
        images: count_story_assets(doc.select(&STORY_IMAGES)),
        flashes: count_story_assets(doc.select(&STORY_SCRIPTS)),
        pages: 1,
    }
}

fn count_story_assets<'a>(elements: impl Iterator<Item = ElementRef<'a>>) -> u64 {
    elements
        .filter_map(|el| el.value().attr("src"))
        .filter(|src| src.contains(STORY_ASSET))
        .count() as u64
}

/// Fetches item pages and counts what's on them.
#[derive(Debug, Clone)]
pub struct DetailFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl DetailFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch every page in order and total their counters.
    ///
    /// Any single failure fails the whole batch.
    pub async fn fetch_counts(&self, urls: &[String]) -> Result<FeedCounters, DetailError> {
        let mut counters = FeedCounters::default();
        for url in urls {
            counters = self.add_page(counters, url).await?;
        }
        Ok(counters)
    }

    async fn add_page(&self, counters: FeedCounters, url: &str) -> Result<FeedCounters, DetailError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| DetailError::Timeout)??;

        if !response.status().is_success() {
            return Err(DetailError::HttpStatus(response.status().as_u16()));
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_PAGE_SIZE))
            .await
            .map_err(|_| DetailError::Timeout)??;
        let page = count_page(&String::from_utf8_lossy(&bytes));

        tracing::debug!(url = %url, ?page, "Counted page");
        Ok(counters + page)
    }
}
