//! LLM provider clients for Polichat.
//!
//! Every provider implements [`Provider`]: a one-shot completion and a
//! streamed completion yielding text deltas. [`LlmRoutes`] decides which
//! provider and model serve each [`Role`].

mod anthropic;
mod openai;
mod retry;
mod routes;
mod sse;
mod traits;

pub mod error;

pub use anthropic::AnthropicProvider;
pub use error::{Error, Result};
pub use openai::OpenAiProvider;
pub use retry::{RetryPolicy, with_retry};
pub use routes::{LlmRoutes, ModelChoice, ProviderKeys, ProviderKind, Role, Route};
pub use sse::{SseBuffer, data_lines, event_data_pairs};
pub use traits::{Completion, Provider, TextStream};
