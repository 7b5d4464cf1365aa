use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use url::Url;

use super::{LookupError, Status, StatusLookup, TimelineQuery};
use crate::util::{read_limited_bytes, REQUEST_TIMEOUT};

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com/1.1";

const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB

/// [`StatusLookup`] over the v1.1-style REST endpoints.
pub struct HttpStatusLookup {
    client: reqwest::Client,
    show_url: Url,
    timeline_url: Url,
    token: Option<SecretString>,
    timeout: Duration,
}

impl HttpStatusLookup {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        token: Option<SecretString>,
    ) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(api_base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            show_url: base.join("statuses/show.json")?,
            timeline_url: base.join("statuses/user_timeline.json")?,
            token,
            timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, subject: &str) -> Result<T, LookupError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| LookupError::Timeout)??;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(subject.to_string()));
        }
        if !status.is_success() {
            return Err(LookupError::HttpStatus(status.as_u16()));
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_RESPONSE_SIZE))
            .await
            .map_err(|_| LookupError::Timeout)??;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl StatusLookup for HttpStatusLookup {
    async fn show(&self, id: &str) -> Result<Status, LookupError> {
        let mut url = self.show_url.clone();
        url.query_pairs_mut().append_pair("id", id);

        tracing::debug!(status = %id, "Looking up status");
        self.get_json(url, &format!("status {id}")).await
    }

    async fn user_timeline(
        &self,
        screen_name: &str,
        query: TimelineQuery,
    ) -> Result<Vec<Status>, LookupError> {
        let mut url = self.timeline_url.clone();
        url.query_pairs_mut()
            .append_pair("screen_name", screen_name)
            .append_pair("count", &query.count.to_string())
            .append_pair("include_rts", if query.include_rts { "true" } else { "false" });

        tracing::debug!(user = %screen_name, count = query.count, "Fetching user timeline");
        self.get_json(url, &format!("user {screen_name}")).await
    }
}

impl std::fmt::Debug for HttpStatusLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStatusLookup")
            .field("show_url", &self.show_url.as_str())
            .field("timeline_url", &self.timeline_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
