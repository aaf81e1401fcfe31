//! Exponential backoff for provider requests.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Retries after the first attempt.
  pub max_retries: u32,
  /// Delay before the first retry; doubled for each further retry.
  pub base_delay:  Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self { max_retries: 3, base_delay: Duration::from_secs(1) } }
}

impl RetryPolicy {
  pub fn none() -> Self { Self { max_retries: 0, base_delay: Duration::ZERO } }

  /// Delay before retry number `retry` (0-based): 1s, 2s, 4s, ...
  pub fn delay(&self, retry: u32) -> Duration { self.base_delay * 2u32.saturating_pow(retry) }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut retry = 0;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_retryable() && retry < policy.max_retries => {
        let delay = policy.delay(retry);
        warn!(provider = label, attempt = retry + 1, ?delay, error = %e, "retrying LLM request");
        tokio::time::sleep(delay).await;
        retry += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;
  use crate::Error;

  fn fast(max_retries: u32) -> RetryPolicy {
    RetryPolicy { max_retries, base_delay: Duration::from_millis(1) }
  }

  fn unavailable() -> Error { Error::Status { provider: "test", status: 503, body: String::new() } }

  #[test]
  fn default_delays_double() {
    let p = RetryPolicy::default();
    assert_eq!(p.delay(0), Duration::from_secs(1));
    assert_eq!(p.delay(1), Duration::from_secs(2));
    assert_eq!(p.delay(2), Duration::from_secs(4));
  }

  #[tokio::test]
  async fn recovers_after_transient_failures() {
    let calls = &AtomicU32::new(0);
    let out = with_retry(&fast(3), "test", || async move {
      if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(unavailable()) } else { Ok("ok") }
    })
    .await
    .unwrap();
    assert_eq!(out, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn gives_up_after_max_retries() {
    let calls = &AtomicU32::new(0);
    let err = with_retry(&fast(3), "test", || async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err::<(), _>(unavailable())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Status { status: 503, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn client_errors_are_not_retried() {
    let calls = &AtomicU32::new(0);
    let _ = with_retry(&fast(3), "test", || async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err::<(), _>(Error::Status { provider: "test", status: 401, body: String::new() })
    })
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
