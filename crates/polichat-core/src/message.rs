//! Chat messages exchanged between a user and a persona.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::{Error, Result};

/// Who authored a chat message.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

/// A single turn of a one-on-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role:    Role,
  pub content: String,
}

impl ChatMessage {
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: Role::User, content: content.into() }
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self { role: Role::Assistant, content: content.into() }
  }
}

/// Check that a conversation can be sent to a model and return the pending
/// user message.
pub fn last_user_message(messages: &[ChatMessage]) -> Result<&ChatMessage> {
  let last = messages.last().ok_or(Error::EmptyConversation)?;
  if last.role != Role::User {
    return Err(Error::LastMessageNotFromUser);
  }
  Ok(last)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_conversation_is_rejected() {
    assert!(matches!(last_user_message(&[]), Err(Error::EmptyConversation)));
  }

  #[test]
  fn trailing_assistant_message_is_rejected() {
    let msgs = vec![ChatMessage::user("안녕하세요"), ChatMessage::assistant("네")];
    assert!(matches!(
      last_user_message(&msgs),
      Err(Error::LastMessageNotFromUser)
    ));
  }

  #[test]
  fn role_serialises_lowercase() {
    let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
    assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    assert_eq!(Role::Assistant.as_ref(), "assistant");
  }
}
