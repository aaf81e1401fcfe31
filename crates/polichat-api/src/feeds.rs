//! News feed sources for issue research.

use std::time::Duration;

use async_trait::async_trait;
use polichat_core::issue::{RssItem, parse_rss};
use thiserror::Error;
use tracing::{debug, warn};

const FEED_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum FeedError {
  #[error("no feeds configured")]
  NoFeeds,

  #[error("every feed failed; last error: {0}")]
  AllFailed(String),

  #[error("http client: {0}")]
  Client(#[from] reqwest::Error),
}

/// Something that yields recent news items.
#[async_trait]
pub trait FeedSource: Send + Sync {
  async fn fetch(&self) -> Result<Vec<RssItem>, FeedError>;
}

/// Fetches and merges a list of RSS URLs. Individual feed failures are
/// logged and skipped; only a total failure is an error.
pub struct HttpFeedSource {
  client: reqwest::Client,
  urls:   Vec<String>,
}

impl HttpFeedSource {
  pub fn new(urls: Vec<String>) -> Result<Self, FeedError> {
    let client = reqwest::Client::builder().timeout(FEED_TIMEOUT).build()?;
    Ok(Self { client, urls })
  }

  async fn fetch_one(&self, url: &str) -> Result<Vec<RssItem>, String> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| e.to_string())?;
    let body = response.text().await.map_err(|e| e.to_string())?;
    parse_rss(&body).map_err(|e| e.to_string())
  }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
  async fn fetch(&self) -> Result<Vec<RssItem>, FeedError> {
    if self.urls.is_empty() {
      return Err(FeedError::NoFeeds);
    }
    let mut items = Vec::new();
    let mut last_error = None;
    for url in &self.urls {
      match self.fetch_one(url).await {
        Ok(mut batch) => {
          debug!(%url, count = batch.len(), "fetched feed");
          items.append(&mut batch);
        }
        Err(e) => {
          warn!(%url, error = %e, "feed fetch failed");
          last_error = Some(e);
        }
      }
    }
    match (items.is_empty(), last_error) {
      (true, Some(e)) => Err(FeedError::AllFailed(e)),
      _ => Ok(items),
    }
  }
}

/// A fixed list of items.
pub struct StaticFeedSource(pub Vec<RssItem>);

#[async_trait]
impl FeedSource for StaticFeedSource {
  async fn fetch(&self) -> Result<Vec<RssItem>, FeedError> { Ok(self.0.clone()) }
}
