//! Versioned debate transcript cache.
//!
//! | Method | Path            | Notes                                              |
//! |--------|-----------------|----------------------------------------------------|
//! | `GET`  | `/debate/cache` | `?topic&style&debate_type[&version]`; ETag, 304     |
//! | `POST` | `/debate/cache` | Stores at `latest + 1`, retrying version conflicts  |
//!
//! ETags are SHA-256 over the key, version and creation time of a transcript,
//! so a given stored version always has the same tag.

use axum::{
  Json,
  extract::{Query, State},
  http::{HeaderMap, StatusCode, header},
  response::{IntoResponse, Response},
};
use polichat_core::{
  debate::{DebateKey, DebateStyle, DebateType, MAX_VERSION_ATTEMPTS, NewTranscript, Transcript, VersionedInsert},
  store::PolichatStore,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CacheQuery {
  pub topic:       String,
  #[serde(default)]
  pub style:       DebateStyle,
  #[serde(default)]
  pub debate_type: DebateType,
  pub version:     Option<u32>,
}

/// Quoted strong ETag for a stored transcript.
pub fn transcript_etag(transcript: &Transcript) -> String {
  let mut hasher = Sha256::new();
  hasher.update(transcript.key.topic.as_bytes());
  hasher.update([0]);
  hasher.update(transcript.key.style.as_ref().as_bytes());
  hasher.update([0]);
  hasher.update(transcript.key.debate_type.as_ref().as_bytes());
  hasher.update(transcript.version.to_le_bytes());
  hasher.update(transcript.created_at.timestamp_micros().to_le_bytes());
  format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Whether `If-None-Match` already names `etag` (or `*`).
fn not_modified(headers: &HeaderMap, etag: &str) -> bool {
  headers
    .get_all(header::IF_NONE_MATCH)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(','))
    .map(|t| t.trim().trim_start_matches("W/"))
    .any(|t| t == "*" || t == etag)
}

// ─── Get ─────────────────────────────────────────────────────────────────────

pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Query(q): Query<CacheQuery>,
  headers: HeaderMap,
) -> Result<Response, ApiError>
where
  S: PolichatStore + 'static,
{
  let key = DebateKey::new(&q.topic, q.style, q.debate_type);
  if key.topic.is_empty() {
    return Err(ApiError::BadRequest("topic is required".into()));
  }

  let found = match q.version {
    Some(version) => state.store.get_transcript(&key, version).await,
    None => state.store.latest_transcript(&key).await,
  }
  .map_err(ApiError::store)?;
  let transcript = found.ok_or_else(|| ApiError::NotFound(format!("no cached debate for {}", key.topic)))?;

  let etag = transcript_etag(&transcript);
  if not_modified(&headers, &etag) {
    return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
  }
  Ok(([(header::ETAG, etag)], Json(transcript)).into_response())
}

// ─── Create ──────────────────────────────────────────────────────────────────

pub async fn create<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewTranscript>,
) -> Result<Response, ApiError>
where
  S: PolichatStore + 'static,
{
  if body.messages.is_empty() {
    return Err(ApiError::BadRequest("a transcript needs at least one message".into()));
  }
  let key = DebateKey::new(&body.key.topic, body.key.style, body.key.debate_type);
  if key.topic.is_empty() {
    return Err(ApiError::BadRequest("topic is required".into()));
  }

  let transcript = save_next_version(&*state.store, NewTranscript { key, ..body }).await?;
  let etag = transcript_etag(&transcript);
  Ok((StatusCode::CREATED, [(header::ETAG, etag)], Json(transcript)).into_response())
}

/// Insert at `latest + 1`. A concurrent writer taking the same version
/// triggers a re-read; after [`MAX_VERSION_ATTEMPTS`] the save fails with a
/// server error rather than a conflict.
pub async fn save_next_version<S: PolichatStore>(
  store: &S,
  new: NewTranscript,
) -> Result<Transcript, ApiError> {
  for attempt in 1..=MAX_VERSION_ATTEMPTS {
    let version = store.latest_version(&new.key).await.map_err(ApiError::store)?.map_or(1, |v| v + 1);
    match store.insert_transcript(new.clone(), version).await.map_err(ApiError::store)? {
      VersionedInsert::Inserted(transcript) => {
        info!(topic = %new.key.topic, style = %new.key.style, version, "cached debate");
        return Ok(transcript);
      }
      VersionedInsert::Conflict => debug!(attempt, version, "cache version taken, retrying"),
    }
  }
  Err(ApiError::Internal(format!(
    "could not allocate a cache version after {MAX_VERSION_ATTEMPTS} attempts"
  )))
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;
  use chrono::{TimeZone, Utc};

  use super::*;

  fn transcript(version: u32, micros: i64) -> Transcript {
    Transcript {
      key: DebateKey::new("기본소득", DebateStyle::Calm, DebateType::Topic),
      version,
      messages: vec![],
      judgment: None,
      created_at: Utc.timestamp_micros(micros).unwrap(),
    }
  }

  #[test]
  fn etag_tracks_version_and_creation_time() {
    let a = transcript_etag(&transcript(1, 1_000));
    assert_eq!(a, transcript_etag(&transcript(1, 1_000)));
    assert_ne!(a, transcript_etag(&transcript(2, 1_000)));
    assert_ne!(a, transcript_etag(&transcript(1, 2_000)));
    assert!(a.starts_with('"') && a.ends_with('"'));
  }

  #[test]
  fn if_none_match_lists_and_wildcards() {
    let etag = transcript_etag(&transcript(1, 1_000));
    let mut headers = HeaderMap::new();
    assert!(!not_modified(&headers, &etag));

    headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(&format!("\"x\", W/{etag}")).unwrap());
    assert!(not_modified(&headers, &etag));

    headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("*"));
    assert!(not_modified(&headers, &etag));
  }
}
