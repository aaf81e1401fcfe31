//! Error types for `polichat-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("persona file for {0:?} has no name")]
  MissingPersonaName(String),

  #[error("invalid persona id: {0:?}")]
  InvalidPersonaId(String),

  #[error("conversation is empty")]
  EmptyConversation,

  #[error("last message must come from the user")]
  LastMessageNotFromUser,

  #[error("rss error: {0}")]
  Rss(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
