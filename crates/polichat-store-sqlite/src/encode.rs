//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, issue dates are `YYYY-MM-DD`. Lists and
//! nested values are compact JSON. Enums use their lowercase string form.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use polichat_core::{
  debate::{DebateKey, DebateMessage, Judgment, Transcript},
  intimacy::{Intimacy, MAX_LEVEL, MIN_LEVEL},
  issue::{Issue, TopicBrief},
  memory::{ChatRecord, UserMemory},
  persona::{KnowledgeFile, Persona},
};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_variant<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::UnknownVariant { kind, value: s.to_owned() })
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: DeserializeOwned>(s: &str) -> Result<T> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `personas` row.
pub struct RawPersona {
  pub persona_id:   String,
  pub name:         String,
  pub party:        Option<String>,
  pub title:        Option<String>,
  pub tone:         Option<String>,
  pub catchphrases: String,
  pub stance:       String,
  pub updated_at:   String,
}

pub const PERSONA_COLUMNS: &str =
  "persona_id, name, party, title, tone, catchphrases, stance, updated_at";

impl RawPersona {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      persona_id:   row.get(0)?,
      name:         row.get(1)?,
      party:        row.get(2)?,
      title:        row.get(3)?,
      tone:         row.get(4)?,
      catchphrases: row.get(5)?,
      stance:       row.get(6)?,
      updated_at:   row.get(7)?,
    })
  }

  pub fn into_persona(self) -> Result<Persona> {
    Ok(Persona {
      id:           self.persona_id,
      name:         self.name,
      party:        self.party,
      title:        self.title,
      tone:         self.tone,
      catchphrases: decode_json(&self.catchphrases)?,
      stance:       self.stance,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawKnowledge {
  pub persona_id: String,
  pub name:       String,
  pub content:    String,
  pub updated_at: String,
}

impl RawKnowledge {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      persona_id: row.get(0)?,
      name:       row.get(1)?,
      content:    row.get(2)?,
      updated_at: row.get(3)?,
    })
  }

  pub fn into_file(self) -> Result<KnowledgeFile> {
    Ok(KnowledgeFile {
      persona_id: self.persona_id,
      name:       self.name,
      content:    self.content,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawTranscript {
  pub topic:         String,
  pub style:         String,
  pub debate_type:   String,
  pub version:       u32,
  pub messages_json: String,
  pub judgment_json: Option<String>,
  pub created_at:    String,
}

pub const TRANSCRIPT_COLUMNS: &str =
  "topic, style, debate_type, version, messages_json, judgment_json, created_at";

impl RawTranscript {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      topic:         row.get(0)?,
      style:         row.get(1)?,
      debate_type:   row.get(2)?,
      version:       row.get(3)?,
      messages_json: row.get(4)?,
      judgment_json: row.get(5)?,
      created_at:    row.get(6)?,
    })
  }

  pub fn into_transcript(self) -> Result<Transcript> {
    let messages: Vec<DebateMessage> = decode_json(&self.messages_json)?;
    let judgment: Option<Judgment> =
      self.judgment_json.as_deref().map(decode_json).transpose()?;
    Ok(Transcript {
      key: DebateKey {
        topic:       self.topic,
        style:       decode_variant("debate style", &self.style)?,
        debate_type: decode_variant("debate type", &self.debate_type)?,
      },
      version: self.version,
      messages,
      judgment,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawIssue {
  pub issue_date:     String,
  pub title:          String,
  pub summary:        String,
  pub talking_points: String,
  pub source_url:     Option<String>,
  pub created_at:     String,
}

pub const ISSUE_COLUMNS: &str =
  "issue_date, title, summary, talking_points, source_url, created_at";

impl RawIssue {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      issue_date:     row.get(0)?,
      title:          row.get(1)?,
      summary:        row.get(2)?,
      talking_points: row.get(3)?,
      source_url:     row.get(4)?,
      created_at:     row.get(5)?,
    })
  }

  pub fn into_issue(self) -> Result<Issue> {
    Ok(Issue {
      date:           decode_date(&self.issue_date)?,
      title:          self.title,
      summary:        self.summary,
      talking_points: decode_json(&self.talking_points)?,
      source_url:     self.source_url,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawBrief {
  pub topic:      String,
  pub persona_id: String,
  pub points:     String,
  pub created_at: String,
}

impl RawBrief {
  pub fn into_brief(self) -> Result<TopicBrief> {
    Ok(TopicBrief {
      topic:      self.topic,
      persona_id: self.persona_id,
      points:     decode_json(&self.points)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawMemory {
  pub user_id:        String,
  pub persona_id:     String,
  pub total_messages: i64,
  pub affinity_score: i64,
  pub facts:          String,
  pub updated_at:     String,
}

pub const MEMORY_COLUMNS: &str =
  "user_id, persona_id, total_messages, affinity_score, facts, updated_at";

impl RawMemory {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:        row.get(0)?,
      persona_id:     row.get(1)?,
      total_messages: row.get(2)?,
      affinity_score: row.get(3)?,
      facts:          row.get(4)?,
      updated_at:     row.get(5)?,
    })
  }

  pub fn into_memory(self) -> Result<UserMemory> {
    Ok(UserMemory {
      user_id:        self.user_id,
      persona_id:     self.persona_id,
      total_messages: self.total_messages.max(0) as u64,
      affinity_score: self.affinity_score.max(0) as u32,
      facts:          decode_json(&self.facts)?,
      updated_at:     decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawChat {
  pub record_id:  String,
  pub user_id:    String,
  pub persona_id: String,
  pub role:       String,
  pub content:    String,
  pub created_at: String,
}

impl RawChat {
  pub fn into_record(self) -> Result<ChatRecord> {
    Ok(ChatRecord {
      id:         Uuid::parse_str(&self.record_id)?,
      user_id:    self.user_id,
      persona_id: self.persona_id,
      role:       decode_variant("role", &self.role)?,
      content:    self.content,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawIntimacy {
  pub user_id:    String,
  pub persona_id: String,
  pub level:      i64,
  pub xp:         i64,
  pub updated_at: String,
}

impl RawIntimacy {
  pub fn into_intimacy(self) -> Result<Intimacy> {
    Ok(Intimacy {
      user_id:    self.user_id,
      persona_id: self.persona_id,
      level:      self.level.clamp(i64::from(MIN_LEVEL), i64::from(MAX_LEVEL)) as u8,
      xp:         self.xp.max(0) as u32,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}
