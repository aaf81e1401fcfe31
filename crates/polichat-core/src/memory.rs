//! What a persona remembers about a user, and the raw conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ChatMessage, Role};

pub const MAX_AFFINITY: u32 = 100;
pub const MAX_FACTS: usize = 20;

/// Aggregate counters for a (user, persona) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMemory {
  pub user_id:        String,
  pub persona_id:     String,
  pub total_messages: u64,
  /// 0..=100; rises by one per message.
  pub affinity_score: u32,
  /// Short remembered statements, oldest first.
  pub facts:          Vec<String>,
  pub updated_at:     DateTime<Utc>,
}

impl UserMemory {
  pub fn new(user_id: impl Into<String>, persona_id: impl Into<String>) -> Self {
    Self {
      user_id:        user_id.into(),
      persona_id:     persona_id.into(),
      total_messages: 0,
      affinity_score: 0,
      facts:          Vec::new(),
      updated_at:     Utc::now(),
    }
  }

  pub fn record_message(&mut self) {
    self.total_messages += 1;
    self.affinity_score = (self.affinity_score + 1).min(MAX_AFFINITY);
    self.updated_at = Utc::now();
  }

  /// Remember `fact`; see [`remember_fact`].
  pub fn add_fact(&mut self, fact: &str) -> bool {
    let added = remember_fact(&mut self.facts, fact);
    if added {
      self.updated_at = Utc::now();
    }
    added
  }
}

/// Append `fact` to `facts`, keeping at most [`MAX_FACTS`]. A fact already
/// present moves to the newest position. Returns `false` for blank input.
pub fn remember_fact(facts: &mut Vec<String>, fact: &str) -> bool {
  let fact = fact.trim();
  if fact.is_empty() {
    return false;
  }
  facts.retain(|f| f != fact);
  facts.push(fact.to_owned());
  if facts.len() > MAX_FACTS {
    let excess = facts.len() - MAX_FACTS;
    facts.drain(..excess);
  }
  true
}

/// One persisted line of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
  pub id:         Uuid,
  pub user_id:    String,
  pub persona_id: String,
  pub role:       Role,
  pub content:    String,
  pub created_at: DateTime<Utc>,
}

impl ChatRecord {
  pub fn new(user_id: &str, persona_id: &str, message: &ChatMessage) -> Self {
    Self {
      id:         Uuid::new_v4(),
      user_id:    user_id.to_owned(),
      persona_id: persona_id.to_owned(),
      role:       message.role,
      content:    message.content.clone(),
      created_at: Utc::now(),
    }
  }

  pub fn to_message(&self) -> ChatMessage {
    ChatMessage { role: self.role, content: self.content.clone() }
  }
}
