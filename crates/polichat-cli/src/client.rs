//! Async HTTP client wrapping the Polichat JSON + SSE API.

use std::{pin::Pin, time::Duration};

use anyhow::{Context, Result, anyhow};
use futures_util::{Stream, StreamExt as _};
use polichat_core::{
  debate::{DebateKey, DebateMessage, DebateStyle, Judgment, NewTranscript, Transcript},
  message::ChatMessage,
  persona::Persona,
};
use polichat_llm::{SseBuffer, data_lines};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Text deltas of a streamed reply.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

// ─── Request bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
  pub topic:    String,
  pub style:    DebateStyle,
  pub speaker:  String,
  pub opponent: String,
  pub history:  Vec<DebateMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeratorRequest {
  pub topic:      String,
  pub a:          String,
  pub b:          String,
  pub messages:   Vec<DebateMessage>,
  pub next_topic: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgeRequest {
  pub topic:    String,
  pub a:        String,
  pub b:        String,
  pub messages: Vec<DebateMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
  pub persona_id: String,
  pub user_id:    Option<String>,
  pub messages:   Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ModeratorReply {
  text: String,
}

// ─── SSE frames ──────────────────────────────────────────────────────────────

/// One decoded `data:` payload from the server.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
  Text(String),
  Error(String),
  Done,
}

#[derive(Deserialize)]
struct RawFrame {
  text:  Option<String>,
  error: Option<String>,
}

pub fn decode_frame(data: &str) -> Option<Frame> {
  if data.trim() == "[DONE]" {
    return Some(Frame::Done);
  }
  let raw: RawFrame = serde_json::from_str(data).ok()?;
  match (raw.error, raw.text) {
    (Some(error), _) => Some(Frame::Error(error)),
    (None, Some(text)) => Some(Frame::Text(text)),
    (None, None) => None,
  }
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Async HTTP client for the Polichat API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client:   Client,
  base_url: String,
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn ensure_success(what: &str, resp: Response) -> Result<Response> {
  let status = resp.status();
  if status.is_success() {
    return Ok(resp);
  }
  let body = resp.text().await.unwrap_or_default();
  let message = serde_json::from_str::<serde_json::Value>(&body)
    .ok()
    .and_then(|v| v["error"].as_str().map(str::to_owned))
    .unwrap_or(body);
  Err(anyhow!("{what} → {status}: {message}"))
}

impl ApiClient {
  pub fn new(base_url: &str) -> Result<Self> {
    // No overall timeout: streamed replies may run for minutes.
    let client = Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
  }

  fn url(&self, path: &str) -> String { format!("{}/api{}", self.base_url, path) }

  async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T> {
    let resp = self
      .client
      .post(self.url(path))
      .timeout(REQUEST_TIMEOUT)
      .json(body)
      .send()
      .await
      .with_context(|| format!("POST {path} failed"))?;
    let resp = ensure_success(&format!("POST {path}"), resp).await?;
    resp.json().await.with_context(|| format!("deserialising POST {path}"))
  }

  /// `POST` a body to an SSE endpoint and decode its text frames.
  async fn stream<B: Serialize>(&self, path: &str, body: &B) -> Result<ReplyStream> {
    let resp = self
      .client
      .post(self.url(path))
      .json(body)
      .send()
      .await
      .with_context(|| format!("POST {path} failed"))?;
    let resp = ensure_success(&format!("POST {path}"), resp).await?;
    let mut bytes = resp.bytes_stream();

    let stream = async_stream::stream! {
      let mut buffer = SseBuffer::new();
      while let Some(chunk) = bytes.next().await {
        match chunk {
          Ok(chunk) => buffer.push_chunk(&chunk),
          Err(e) => {
            yield Err(anyhow::Error::from(e).context("reply stream interrupted"));
            return;
          }
        }
        while let Some(block) = buffer.next_event_block() {
          for data in data_lines(&block) {
            match decode_frame(data) {
              Some(Frame::Text(text)) => yield Ok(text),
              Some(Frame::Error(message)) => {
                yield Err(anyhow!("server reported: {message}"));
                return;
              }
              Some(Frame::Done) => return,
              None => {}
            }
          }
        }
      }
      yield Err(anyhow!("reply stream closed before completion"));
    };
    Ok(Box::pin(stream))
  }

  // ── Personas ──────────────────────────────────────────────────────────────

  /// `GET /api/personas/{id}`
  pub async fn persona(&self, id: &str) -> Result<Persona> {
    let resp = self
      .client
      .get(self.url(&format!("/personas/{id}")))
      .timeout(REQUEST_TIMEOUT)
      .send()
      .await
      .context("GET /personas failed")?;
    let resp = ensure_success(&format!("GET /personas/{id}"), resp).await?;
    resp.json().await.context("deserialising persona")
  }

  // ── Debate ────────────────────────────────────────────────────────────────

  /// `POST /api/debate` (SSE)
  pub async fn turn(&self, request: &TurnRequest) -> Result<ReplyStream> { self.stream("/debate", request).await }

  /// `POST /api/debate/moderator`
  pub async fn moderator(&self, request: &ModeratorRequest) -> Result<String> {
    let reply: ModeratorReply = self.post_json("/debate/moderator", request).await?;
    Ok(reply.text)
  }

  /// `POST /api/debate/judge`
  pub async fn judge(&self, request: &JudgeRequest) -> Result<Judgment> {
    self.post_json("/debate/judge", request).await
  }

  /// `POST /api/debate/cache`
  pub async fn save_transcript(&self, transcript: &NewTranscript) -> Result<Transcript> {
    self.post_json("/debate/cache", transcript).await
  }

  /// `GET /api/debate/cache?topic&style&debate_type`; `None` when nothing is cached.
  pub async fn cached_transcript(&self, key: &DebateKey) -> Result<Option<Transcript>> {
    let resp = self
      .client
      .get(self.url("/debate/cache"))
      .timeout(REQUEST_TIMEOUT)
      .query(&[
        ("topic", key.topic.as_str()),
        ("style", key.style.as_ref()),
        ("debate_type", key.debate_type.as_ref()),
      ])
      .send()
      .await
      .context("GET /debate/cache failed")?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let resp = ensure_success("GET /debate/cache", resp).await?;
    resp.json().await.map(Some).context("deserialising transcript")
  }

  // ── Chat ──────────────────────────────────────────────────────────────────

  /// `POST /api/chat` (SSE)
  pub async fn chat(&self, request: &ChatRequest) -> Result<ReplyStream> { self.stream("/chat", request).await }
}
