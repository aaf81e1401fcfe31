//! OpenAI-compatible chat completions, also used for OpenRouter.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt as _;
use polichat_core::message::Role;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  anthropic::{COMPLETION_TIMEOUT, STREAM_TIMEOUT, build_client},
  error::check_status,
  retry::{RetryPolicy, with_retry},
  sse::{SseBuffer, data_lines},
  traits::{Completion, Provider, TextStream},
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_HEADERS: [(&str, &str); 2] =
  [("HTTP-Referer", "https://github.com/polichat/polichat"), ("X-Title", "Polichat")];

pub struct OpenAiProvider {
  name:          &'static str,
  auth_header:   String,
  completions:   String,
  extra_headers: &'static [(&'static str, &'static str)],
  client:        Client,
  retry:         RetryPolicy,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
  model:       &'a str,
  messages:    Vec<Message<'a>>,
  max_tokens:  u32,
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
  choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
  message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chunk {
  #[serde(default)]
  choices: Vec<ChunkChoice>,
  error:   Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
  delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
  message: String,
}

impl OpenAiProvider {
  pub fn new(api_key: &str) -> Result<Self> {
    Self::with_base_url("openai", api_key, OPENAI_BASE_URL, &[])
  }

  /// OpenRouter speaks the same protocol under a different base URL and
  /// wants attribution headers.
  pub fn openrouter(api_key: &str) -> Result<Self> {
    Self::with_base_url("openrouter", api_key, OPENROUTER_BASE_URL, &OPENROUTER_HEADERS)
  }

  pub fn with_base_url(
    name: &'static str,
    api_key: &str,
    base_url: &str,
    extra_headers: &'static [(&'static str, &'static str)],
  ) -> Result<Self> {
    Ok(Self {
      name,
      auth_header: format!("Bearer {api_key}"),
      completions: format!("{}/chat/completions", base_url.trim_end_matches('/')),
      extra_headers,
      client: build_client()?,
      retry: RetryPolicy::default(),
    })
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn body<'a>(request: &'a Completion, stream: bool) -> Request<'a> {
    let system = (!request.system.is_empty())
      .then(|| Message { role: "system", content: &request.system });
    let turns = request.messages.iter().map(|m| Message {
      role:    match m.role {
        Role::User => "user",
        Role::Assistant => "assistant",
      },
      content: &m.content,
    });
    Request {
      model: &request.model,
      messages: system.into_iter().chain(turns).collect(),
      max_tokens: request.max_tokens,
      temperature: request.temperature,
      stream,
    }
  }

  async fn send(&self, body: &Request<'_>, timeout: Duration) -> Result<reqwest::Response> {
    let (client, url, auth, extra, name) =
      (&self.client, &self.completions, &self.auth_header, self.extra_headers, self.name);
    with_retry(&self.retry, name, || async move {
      let mut builder = client.post(url).timeout(timeout).header("Authorization", auth);
      for (key, value) in extra {
        builder = builder.header(*key, *value);
      }
      let response = builder.json(body).send().await?;
      check_status(name, response).await
    })
    .await
  }
}

/// Text carried by one `data:` payload of a chat completion stream.
fn text_from_data(provider: &'static str, data: &str) -> Result<Option<String>> {
  if data.trim() == "[DONE]" {
    return Ok(None);
  }
  let chunk: Chunk = serde_json::from_str(data)?;
  if let Some(error) = chunk.error {
    return Err(Error::Stream { provider, message: error.message });
  }
  Ok(
    chunk
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.delta.content)
      .filter(|t| !t.is_empty()),
  )
}

#[async_trait]
impl Provider for OpenAiProvider {
  fn name(&self) -> &str { self.name }

  async fn complete(&self, request: &Completion) -> Result<String> {
    let response = self.send(&Self::body(request, false), COMPLETION_TIMEOUT).await?;
    let parsed: Response = response.json().await?;
    parsed
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .filter(|t| !t.trim().is_empty())
      .ok_or(Error::EmptyResponse(self.name))
  }

  async fn stream(&self, request: &Completion) -> Result<TextStream> {
    let response = self.send(&Self::body(request, true), STREAM_TIMEOUT).await?;
    let mut bytes = response.bytes_stream();
    let name = self.name;

    let stream = async_stream::try_stream! {
      let mut buffer = SseBuffer::new();
      while let Some(chunk) = bytes.next().await {
        buffer.push_chunk(&chunk?);
        while let Some(block) = buffer.next_event_block() {
          for data in data_lines(&block) {
            if let Some(text) = text_from_data(name, data)? {
              yield text;
            }
          }
        }
      }
    };
    Ok(Box::pin(stream))
  }
}
