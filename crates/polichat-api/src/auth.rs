//! Bearer-secret extractor guarding the warmup and backfill endpoints.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use polichat_core::store::PolichatStore;
use sha2::{Digest, Sha256};

use crate::{AppState, error::ApiError};

/// Zero-size marker: present in the handler means the request carried the
/// configured warmup secret.
pub struct WarmupAuth;

/// Check `Authorization: Bearer <secret>`. Without a configured secret every
/// request is rejected.
pub fn verify_secret(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
  let expected = secret.filter(|s| !s.is_empty()).ok_or(ApiError::Unauthorized)?;

  let provided = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .ok_or(ApiError::Unauthorized)?;

  // Compare digests so the comparison length does not depend on the input.
  if Sha256::digest(provided.trim().as_bytes()) != Sha256::digest(expected.as_bytes()) {
    return Err(ApiError::Unauthorized);
  }
  Ok(())
}

impl<S> FromRequestParts<AppState<S>> for WarmupAuth
where
  S: PolichatStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    verify_secret(&parts.headers, state.config.warmup_secret.as_deref())?;
    Ok(WarmupAuth)
  }
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn bearer(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    headers
  }

  #[test]
  fn accepts_matching_secret() {
    assert!(verify_secret(&bearer("Bearer s3cret"), Some("s3cret")).is_ok());
  }

  #[test]
  fn rejects_wrong_or_missing_secret() {
    assert!(verify_secret(&bearer("Bearer nope"), Some("s3cret")).is_err());
    assert!(verify_secret(&bearer("Basic s3cret"), Some("s3cret")).is_err());
    assert!(verify_secret(&HeaderMap::new(), Some("s3cret")).is_err());
  }

  #[test]
  fn unconfigured_secret_rejects_everything() {
    assert!(verify_secret(&bearer("Bearer "), None).is_err());
    assert!(verify_secret(&bearer("Bearer x"), Some("")).is_err());
  }
}
