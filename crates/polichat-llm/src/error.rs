//! Error type for `polichat-llm`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{provider} returned {status}: {body}")]
  Status { provider: &'static str, status: u16, body: String },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// An error event received in the middle of a stream.
  #[error("{provider} stream error: {message}")]
  Stream { provider: &'static str, message: String },

  #[error("{0} returned no text")]
  EmptyResponse(&'static str),

  #[error("no LLM provider is configured")]
  NoProvider,
}

impl Error {
  /// Rate limits, transient server errors and transport timeouts.
  pub fn is_retryable(&self) -> bool {
    match self {
      Error::Status { status, .. } => matches!(status, 429 | 500 | 503),
      Error::Http(e) => e.is_timeout() || e.is_connect(),
      _ => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Turn a non-success response into [`Error::Status`], keeping a prefix of the
/// body for the log.
pub(crate) async fn check_status(
  provider: &'static str,
  response: reqwest::Response,
) -> Result<reqwest::Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  Err(Error::Status {
    provider,
    status: status.as_u16(),
    body: body.chars().take(500).collect(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn status(code: u16) -> Error { Error::Status { provider: "test", status: code, body: String::new() } }

  #[test]
  fn retryable_statuses() {
    assert!(status(429).is_retryable());
    assert!(status(500).is_retryable());
    assert!(status(503).is_retryable());
    assert!(!status(400).is_retryable());
    assert!(!status(401).is_retryable());
    assert!(!Error::NoProvider.is_retryable());
  }
}
