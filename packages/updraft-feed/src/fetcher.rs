use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use updraft_utils::http::{fetch, http_status_is_ok};

use crate::appcast::{parse_appcast, ReleaseCandidate};

/// Bound on one feed retrieval. Retries are the scheduler's business, not
/// the fetcher's.
pub const FEED_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),
    #[error("feed parse error: {0}")]
    Parse(String),
}

/// Retrieves and parses the remote appcast. Faked in tests; the state
/// machine never talks to the network directly.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetches `url` and returns the advertised candidates. `bypass_cache`
    /// asks intermediaries for a fresh document; manual checks use it so
    /// they can see updates too new to have propagated through caches.
    async fn fetch(&self, url: &str, bypass_cache: bool)
        -> Result<Vec<ReleaseCandidate>, FeedError>;
}

#[derive(Default)]
pub struct HttpFeedFetcher;

impl HttpFeedFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(
        &self,
        url: &str,
        bypass_cache: bool,
    ) -> Result<Vec<ReleaseCandidate>, FeedError> {
        let uri = url
            .parse()
            .map_err(|e| FeedError::Transport(format!("invalid appcast url {url:?}: {e}")))?;

        let mut headers = HashMap::new();
        if bypass_cache {
            headers.insert("Cache-Control".to_string(), "no-cache".to_string());
            headers.insert("Pragma".to_string(), "no-cache".to_string());
        }

        tracing::debug!(url, bypass_cache, "fetching appcast");
        let response = tokio::time::timeout(FEED_TIMEOUT, fetch(uri, &headers))
            .await
            .map_err(|_| FeedError::Transport(format!("feed request timed out: {url}")))?
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if !http_status_is_ok(response.status) {
            return Err(FeedError::Transport(format!(
                "feed request failed with status {}",
                response.status
            )));
        }

        let body = response.body.unwrap_or_default();
        let text = std::str::from_utf8(&body)
            .map_err(|e| FeedError::Parse(format!("feed is not valid utf-8: {e}")))?;
        parse_appcast(text)
    }
}
