//! Status ("tweet") lookups.
//!
//! Chat code only sees the [`StatusLookup`] trait; the HTTP implementation
//! lives in [`client`] and is constructed once at startup and shared.

pub mod client;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::util::{unescape_basic_entities, BodyError};

pub use client::HttpStatusLookup;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub screen_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub id_str: Option<String>,
    /// Legacy text, cut at 140 characters when `full_text` is present.
    #[serde(default)]
    pub text: String,
    /// Untruncated text from extended-mode responses.
    #[serde(default)]
    pub full_text: Option<String>,
    pub user: User,
    #[serde(default)]
    pub retweeted_status: Option<Box<Status>>,
}

impl Status {
    fn content(&self) -> &str {
        self.full_text.as_deref().unwrap_or(&self.text)
    }

    /// Text of the status; retweets are shown as `RT @origin: text`.
    pub fn body(&self) -> String {
        match &self.retweeted_status {
            Some(rt) => format!(
                "RT @{}: {}",
                rt.user.screen_name,
                unescape_basic_entities(rt.content())
            ),
            None => unescape_basic_entities(self.content()).into_owned(),
        }
    }

    /// Chat line for this status: `<user> text`.
    pub fn render(&self) -> String {
        format!("<{}> {}", self.user.screen_name, self.body())
    }
}

/// Options for a user timeline request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineQuery {
    pub count: u32,
    pub include_rts: bool,
}

impl TimelineQuery {
    /// Just the most recent status, retweets included.
    pub fn latest() -> Self {
        Self {
            count: 1,
            include_rts: true,
        }
    }
}

#[async_trait]
pub trait StatusLookup: Send + Sync {
    /// Fetch a single status by id.
    async fn show(&self, id: &str) -> Result<Status, LookupError>;

    /// Fetch the newest statuses posted by `screen_name`, newest first.
    async fn user_timeline(
        &self,
        screen_name: &str,
        query: TimelineQuery,
    ) -> Result<Vec<Status>, LookupError>;
}
