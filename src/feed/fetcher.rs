use std::time::Duration;

use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;

use super::poller::{FeedPollState, PollError};
use crate::util::read_limited_bytes;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Result of one conditional feed request.
#[derive(Debug)]
pub enum FeedFetch {
    /// `304`: nothing changed since the validators we sent.
    NotModified,
    Fetched {
        body: Vec<u8>,
        last_modified: Option<String>,
        etag: Option<String>,
    },
}

/// GET the feed, sending whatever cache validators `state` holds.
///
/// # Errors
///
/// - [`PollError::Timeout`] - headers or body took longer than `timeout`
/// - [`PollError::UnexpectedStatus`] - anything other than 200 or 304
/// - [`PollError::Network`] - connection or TLS errors
/// - [`PollError::Body`] - body over 10MB or cut short
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    state: &FeedPollState,
    timeout: Duration,
) -> Result<FeedFetch, PollError> {
    let mut request = client.get(url);
    if let Some(last_modified) = &state.last_modified {
        request = request.header(IF_MODIFIED_SINCE, last_modified);
    }
    if let Some(etag) = &state.etag {
        request = request.header(IF_NONE_MATCH, etag);
    }

    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| PollError::Timeout)??;

    match response.status() {
        StatusCode::NOT_MODIFIED => return Ok(FeedFetch::NotModified),
        StatusCode::OK => {}
        other => return Err(PollError::UnexpectedStatus(other.as_u16())),
    }

    let last_modified = header_string(response.headers(), LAST_MODIFIED);
    let etag = header_string(response.headers(), ETAG);

    let body = tokio::time::timeout(timeout, read_limited_bytes(response, MAX_FEED_SIZE))
        .await
        .map_err(|_| PollError::Timeout)??;

    Ok(FeedFetch::Fetched {
        body,
        last_modified,
        etag,
    })
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_captures_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss/>")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .insert_header("ETag", "\"abc\""),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let fetched = fetch_feed(&client, &server.uri(), &FeedPollState::default(), TIMEOUT)
            .await
            .unwrap();
        match fetched {
            FeedFetch::Fetched {
                body,
                last_modified,
                etag,
            } => {
                assert_eq!(body, b"<rss/>");
                assert_eq!(last_modified.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
                assert_eq!(etag.as_deref(), Some("\"abc\""));
            }
            other => panic!("Expected Fetched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sends_validators_and_handles_304() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-Modified-Since", "Wed, 21 Oct 2015 07:28:00 GMT"))
            .and(header("If-None-Match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let state = FeedPollState {
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
            etag: Some("\"abc\"".into()),
            last_seen_item_id: None,
        };
        let client = reqwest::Client::new();
        let fetched = fetch_feed(&client, &server.uri(), &state, TIMEOUT).await.unwrap();
        assert!(matches!(fetched, FeedFetch::NotModified));
    }

    #[tokio::test]
    async fn test_other_status_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_feed(&client, &server.uri(), &FeedPollState::default(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::UnexpectedStatus(503)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_feed(
            &client,
            &server.uri(),
            &FeedPollState::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Timeout));
    }
}
