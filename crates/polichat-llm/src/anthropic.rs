//! Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt as _;
use polichat_core::message::Role;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  error::check_status,
  retry::{RetryPolicy, with_retry},
  sse::{SseBuffer, event_data_pairs},
  traits::{Completion, Provider, TextStream},
};

const NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub(crate) const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const STREAM_TIMEOUT: Duration = Duration::from_secs(180);
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_client() -> Result<Client> {
  Ok(Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?)
}

pub struct AnthropicProvider {
  api_key:      String,
  messages_url: String,
  client:       Client,
  retry:        RetryPolicy,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
  model:       &'a str,
  max_tokens:  u32,
  #[serde(skip_serializing_if = "str::is_empty")]
  system:      &'a str,
  messages:    Vec<Message<'a>>,
  temperature: f32,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  stream:      bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
  role:    &'a str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct Response {
  content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
  Text {
    text: String,
  },
  #[serde(other)]
  Other,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
  delta: Delta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
  TextDelta {
    text: String,
  },
  #[serde(other)]
  Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
  error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  message: String,
}

impl AnthropicProvider {
  pub fn new(api_key: impl Into<String>) -> Result<Self> { Self::with_base_url(api_key, DEFAULT_BASE_URL) }

  pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
    Ok(Self {
      api_key:      api_key.into(),
      messages_url: format!("{}/v1/messages", base_url.trim_end_matches('/')),
      client:       build_client()?,
      retry:        RetryPolicy::default(),
    })
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn body<'a>(request: &'a Completion, stream: bool) -> Request<'a> {
    Request {
      model: &request.model,
      max_tokens: request.max_tokens,
      system: &request.system,
      messages: request
        .messages
        .iter()
        .map(|m| Message {
          role:    match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
          },
          content: &m.content,
        })
        .collect(),
      temperature: request.temperature,
      stream,
    }
  }

  async fn send(&self, body: &Request<'_>, timeout: Duration) -> Result<reqwest::Response> {
    let (client, url, api_key) = (&self.client, &self.messages_url, &self.api_key);
    with_retry(&self.retry, NAME, || async move {
      let response = client
        .post(url)
        .timeout(timeout)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(body)
        .send()
        .await?;
      check_status(NAME, response).await
    })
    .await
  }
}

/// Text carried by one streamed event, or the error it reports.
fn text_from_event(event: &str, data: &str) -> Result<Option<String>> {
  match event {
    "content_block_delta" => match serde_json::from_str::<BlockDelta>(data)?.delta {
      Delta::TextDelta { text } => Ok(Some(text)),
      Delta::Other => Ok(None),
    },
    "error" => {
      let message = serde_json::from_str::<StreamError>(data)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| data.to_owned());
      Err(Error::Stream { provider: NAME, message })
    }
    _ => Ok(None),
  }
}

#[async_trait]
impl Provider for AnthropicProvider {
  fn name(&self) -> &str { NAME }

  async fn complete(&self, request: &Completion) -> Result<String> {
    let response = self.send(&Self::body(request, false), COMPLETION_TIMEOUT).await?;
    let parsed: Response = response.json().await?;
    let text: String = parsed
      .content
      .into_iter()
      .filter_map(|block| match block {
        ContentBlock::Text { text } => Some(text),
        ContentBlock::Other => None,
      })
      .collect();
    if text.trim().is_empty() {
      return Err(Error::EmptyResponse(NAME));
    }
    Ok(text)
  }

  async fn stream(&self, request: &Completion) -> Result<TextStream> {
    let response = self.send(&Self::body(request, true), STREAM_TIMEOUT).await?;
    let mut bytes = response.bytes_stream();

    let stream = async_stream::try_stream! {
      let mut buffer = SseBuffer::new();
      while let Some(chunk) = bytes.next().await {
        buffer.push_chunk(&chunk?);
        while let Some(block) = buffer.next_event_block() {
          for (event, data) in event_data_pairs(&block) {
            if let Some(text) = text_from_event(event, data)? {
              yield text;
            }
          }
        }
      }
    };
    Ok(Box::pin(stream))
  }
}

#[cfg(test)]
mod tests {
  use polichat_core::message::ChatMessage;

  use super::*;

  #[test]
  fn body_maps_roles_and_omits_empty_system() {
    let req = Completion::new(
      "claude-sonnet-4-20250514",
      "",
      vec![ChatMessage::user("안녕"), ChatMessage::assistant("네"), ChatMessage::user("질문")],
    );
    let json = serde_json::to_value(AnthropicProvider::body(&req, false)).unwrap();
    assert!(json.get("system").is_none());
    assert!(json.get("stream").is_none());
    assert_eq!(json["messages"][1]["role"], "assistant");
    assert_eq!(json["max_tokens"], 1024);

    let json = serde_json::to_value(AnthropicProvider::body(&req, true)).unwrap();
    assert_eq!(json["stream"], true);
  }

  #[test]
  fn decodes_text_deltas() {
    let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"안녕"}}"#;
    assert_eq!(text_from_event("content_block_delta", data).unwrap().as_deref(), Some("안녕"));

    let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#;
    assert_eq!(text_from_event("content_block_delta", data).unwrap(), None);
    assert_eq!(text_from_event("message_stop", "{}").unwrap(), None);
  }

  #[test]
  fn error_events_fail_the_stream() {
    let data = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
    let err = text_from_event("error", data).unwrap_err();
    assert!(matches!(err, Error::Stream { ref message, .. } if message == "Overloaded"));
  }
}
