//! The [`Provider`] trait and its request type.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use polichat_core::{debate::Prompt, message::ChatMessage};

use crate::Result;

/// Text deltas in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// A provider-independent completion request.
#[derive(Debug, Clone)]
pub struct Completion {
  pub model:       String,
  pub system:      String,
  pub messages:    Vec<ChatMessage>,
  pub max_tokens:  u32,
  pub temperature: f32,
}

impl Completion {
  pub fn new(model: impl Into<String>, system: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
    Self {
      model: model.into(),
      system: system.into(),
      messages,
      max_tokens: DEFAULT_MAX_TOKENS,
      temperature: DEFAULT_TEMPERATURE,
    }
  }

  /// A single-turn request from a system/user prompt pair.
  pub fn from_prompt(model: impl Into<String>, prompt: &Prompt) -> Self {
    Self::new(model, prompt.system.clone(), vec![ChatMessage::user(prompt.user.clone())])
  }

  pub fn max_tokens(mut self, max_tokens: u32) -> Self {
    self.max_tokens = max_tokens;
    self
  }

  pub fn temperature(mut self, temperature: f32) -> Self {
    self.temperature = temperature;
    self
  }
}

#[async_trait]
pub trait Provider: Send + Sync {
  fn name(&self) -> &str;

  async fn complete(&self, request: &Completion) -> Result<String>;

  /// Start a streamed completion. Errors before the first byte are returned
  /// directly; later failures arrive as stream items.
  async fn stream(&self, request: &Completion) -> Result<TextStream>;
}
