//! [`SqliteStore`], the SQLite implementation of [`PolichatStore`].

use std::path::Path;

use chrono::{NaiveDate, Utc};
use polichat_core::{
  debate::{DebateKey, NewTranscript, Transcript, VersionedInsert},
  intimacy::{Intimacy, LevelChange, MAX_LEVEL, MIN_LEVEL, XP_PER_LEVEL},
  issue::{Issue, SaveOutcome, TopicBrief},
  memory::{ChatRecord, MAX_AFFINITY, UserMemory, remember_fact},
  persona::{KnowledgeChunk, KnowledgeFile, Persona, rank_chunks, validate_id},
  store::PolichatStore,
};
use rusqlite::OptionalExtension as _;
use tracing::debug;

use crate::{
  Error, Result,
  encode::{
    ISSUE_COLUMNS, MEMORY_COLUMNS, PERSONA_COLUMNS, RawBrief, RawChat, RawIntimacy, RawIssue,
    RawKnowledge, RawMemory, RawPersona, RawTranscript, TRANSCRIPT_COLUMNS, encode_date,
    encode_dt, encode_json,
  },
  schema::SCHEMA,
};

/// Whether `e` is a violation of a UNIQUE or PRIMARY KEY constraint.
fn is_unique_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _)
      if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  )
}

enum RawSave {
  Inserted,
  Replaced,
  Kept(RawIssue),
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Polichat store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn read_transcript(&self, key: &DebateKey, version: Option<u32>) -> Result<Option<Transcript>> {
    let topic = key.topic.clone();
    let style = key.style.as_ref().to_owned();
    let debate_type = key.debate_type.as_ref().to_owned();

    let raw = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {TRANSCRIPT_COLUMNS} FROM debate_cache
           WHERE topic = ?1 AND style = ?2 AND debate_type = ?3
             AND (?4 IS NULL OR version = ?4)
           ORDER BY version DESC LIMIT 1"
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params![topic, style, debate_type, version],
              RawTranscript::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTranscript::into_transcript).transpose()
  }
}

// ─── PolichatStore impl ──────────────────────────────────────────────────────

impl PolichatStore for SqliteStore {
  type Error = Error;

  // ── Personas ──────────────────────────────────────────────────────────────

  async fn upsert_persona(&self, mut persona: Persona) -> Result<Persona> {
    validate_id(&persona.id)?;
    persona.updated_at = Utc::now();

    let id = persona.id.clone();
    let name = persona.name.clone();
    let party = persona.party.clone();
    let title = persona.title.clone();
    let tone = persona.tone.clone();
    let catchphrases = encode_json(&persona.catchphrases)?;
    let stance = persona.stance.clone();
    let at = encode_dt(persona.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO personas (persona_id, name, party, title, tone, catchphrases, stance, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT (persona_id) DO UPDATE SET
             name = excluded.name, party = excluded.party, title = excluded.title,
             tone = excluded.tone, catchphrases = excluded.catchphrases,
             stance = excluded.stance, updated_at = excluded.updated_at",
          rusqlite::params![id, name, party, title, tone, catchphrases, stance, at],
        )?;
        Ok(())
      })
      .await?;

    Ok(persona)
  }

  async fn get_persona(&self, id: &str) -> Result<Option<Persona>> {
    let id = id.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {PERSONA_COLUMNS} FROM personas WHERE persona_id = ?1");
        Ok(conn.query_row(&sql, rusqlite::params![id], RawPersona::from_row).optional()?)
      })
      .await?;
    raw.map(RawPersona::into_persona).transpose()
  }

  async fn list_personas(&self) -> Result<Vec<Persona>> {
    let raws = self
      .conn
      .call(|conn| {
        let sql = format!("SELECT {PERSONA_COLUMNS} FROM personas ORDER BY persona_id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawPersona::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawPersona::into_persona).collect()
  }

  async fn delete_persona(&self, id: &str) -> Result<bool> {
    let id = id.to_owned();
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM personas WHERE persona_id = ?1", rusqlite::params![id])?)
      })
      .await?;
    Ok(deleted > 0)
  }

  // ── Knowledge ─────────────────────────────────────────────────────────────

  async fn put_knowledge(&self, mut file: KnowledgeFile) -> Result<KnowledgeFile> {
    file.updated_at = Utc::now();

    let persona_id = file.persona_id.clone();
    let name = file.name.clone();
    let content = file.content.clone();
    let at = encode_dt(file.updated_at);

    let found = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM personas WHERE persona_id = ?1",
            rusqlite::params![persona_id],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !exists {
          return Ok(false);
        }
        conn.execute(
          "INSERT INTO knowledge (persona_id, name, content, updated_at) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (persona_id, name) DO UPDATE SET
             content = excluded.content, updated_at = excluded.updated_at",
          rusqlite::params![persona_id, name, content, at],
        )?;
        Ok(true)
      })
      .await?;

    if !found {
      return Err(Error::PersonaNotFound(file.persona_id));
    }
    Ok(file)
  }

  async fn list_knowledge(&self, persona_id: &str) -> Result<Vec<KnowledgeFile>> {
    let persona_id = persona_id.to_owned();
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT persona_id, name, content, updated_at FROM knowledge
           WHERE persona_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![persona_id], RawKnowledge::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawKnowledge::into_file).collect()
  }

  async fn delete_knowledge(&self, persona_id: &str, name: &str) -> Result<bool> {
    let persona_id = persona_id.to_owned();
    let name = name.to_owned();
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM knowledge WHERE persona_id = ?1 AND name = ?2",
          rusqlite::params![persona_id, name],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn search_knowledge(
    &self,
    persona_id: &str,
    query: &str,
    limit: usize,
  ) -> Result<Vec<KnowledgeChunk>> {
    // Knowledge sets are a handful of markdown files per persona; ranking
    // happens in memory over the chunked text.
    let files = self.list_knowledge(persona_id).await?;
    Ok(rank_chunks(&files, query, limit))
  }

  // ── Debate cache ──────────────────────────────────────────────────────────

  async fn latest_version(&self, key: &DebateKey) -> Result<Option<u32>> {
    let topic = key.topic.clone();
    let style = key.style.as_ref().to_owned();
    let debate_type = key.debate_type.as_ref().to_owned();

    let version = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT MAX(version) FROM debate_cache
           WHERE topic = ?1 AND style = ?2 AND debate_type = ?3",
          rusqlite::params![topic, style, debate_type],
          |r| r.get::<_, Option<u32>>(0),
        )?)
      })
      .await?;
    Ok(version)
  }

  async fn insert_transcript(
    &self,
    transcript: NewTranscript,
    version: u32,
  ) -> Result<VersionedInsert> {
    let stored = Transcript {
      key: transcript.key,
      version,
      messages: transcript.messages,
      judgment: transcript.judgment,
      created_at: Utc::now(),
    };

    let topic = stored.key.topic.clone();
    let style = stored.key.style.as_ref().to_owned();
    let debate_type = stored.key.debate_type.as_ref().to_owned();
    let messages = encode_json(&stored.messages)?;
    let judgment = stored.judgment.as_ref().map(encode_json).transpose()?;
    let at = encode_dt(stored.created_at);

    let inserted = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO debate_cache
             (topic, style, debate_type, version, messages_json, judgment_json, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![topic, style, debate_type, version, messages, judgment, at],
        );
        match result {
          Ok(_) => Ok(true),
          Err(e) if is_unique_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !inserted {
      debug!(topic = %stored.key.topic, version, "debate cache version already taken");
      return Ok(VersionedInsert::Conflict);
    }
    Ok(VersionedInsert::Inserted(stored))
  }

  async fn latest_transcript(&self, key: &DebateKey) -> Result<Option<Transcript>> {
    self.read_transcript(key, None).await
  }

  async fn get_transcript(&self, key: &DebateKey, version: u32) -> Result<Option<Transcript>> {
    self.read_transcript(key, Some(version)).await
  }

  // ── Issues ────────────────────────────────────────────────────────────────

  async fn save_issue(&self, issue: Issue, force: bool) -> Result<SaveOutcome> {
    let date = encode_date(issue.date);
    let title = issue.title.clone();
    let summary = issue.summary.clone();
    let points = encode_json(&issue.talking_points)?;
    let source_url = issue.source_url.clone();
    let at = encode_dt(issue.created_at);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE issue_date = ?1");
        let existing = tx.query_row(&sql, rusqlite::params![date], RawIssue::from_row).optional()?;

        let outcome = match existing {
          Some(raw) if !force => RawSave::Kept(raw),
          Some(_) => {
            tx.execute(
              "UPDATE issues SET title = ?2, summary = ?3, talking_points = ?4,
                 source_url = ?5, created_at = ?6
               WHERE issue_date = ?1",
              rusqlite::params![date, title, summary, points, source_url, at],
            )?;
            RawSave::Replaced
          }
          None => {
            tx.execute(
              "INSERT INTO issues (issue_date, title, summary, talking_points, source_url, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
              rusqlite::params![date, title, summary, points, source_url, at],
            )?;
            RawSave::Inserted
          }
        };
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    Ok(match outcome {
      RawSave::Inserted => SaveOutcome::Inserted,
      RawSave::Replaced => SaveOutcome::Replaced,
      RawSave::Kept(raw) => SaveOutcome::Kept(raw.into_issue()?),
    })
  }

  async fn get_issue(&self, date: NaiveDate) -> Result<Option<Issue>> {
    let date = encode_date(date);
    let raw = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE issue_date = ?1");
        Ok(conn.query_row(&sql, rusqlite::params![date], RawIssue::from_row).optional()?)
      })
      .await?;
    raw.map(RawIssue::into_issue).transpose()
  }

  async fn list_issues(&self, limit: usize) -> Result<Vec<Issue>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws = self
      .conn
      .call(move |conn| {
        let sql =
          format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY issue_date DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![limit], RawIssue::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawIssue::into_issue).collect()
  }

  // ── Briefs ────────────────────────────────────────────────────────────────

  async fn put_brief(&self, brief: TopicBrief) -> Result<()> {
    let points = encode_json(&brief.points)?;
    let at = encode_dt(brief.created_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO topic_briefs (topic, persona_id, points, created_at) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (topic, persona_id) DO UPDATE SET
             points = excluded.points, created_at = excluded.created_at",
          rusqlite::params![brief.topic, brief.persona_id, points, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_brief(&self, topic: &str, persona_id: &str) -> Result<Option<TopicBrief>> {
    let topic = topic.to_owned();
    let persona_id = persona_id.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT topic, persona_id, points, created_at FROM topic_briefs
               WHERE topic = ?1 AND persona_id = ?2",
              rusqlite::params![topic, persona_id],
              |r| {
                Ok(RawBrief {
                  topic:      r.get(0)?,
                  persona_id: r.get(1)?,
                  points:     r.get(2)?,
                  created_at: r.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawBrief::into_brief).transpose()
  }

  // ── Memory and history ────────────────────────────────────────────────────

  async fn record_message(&self, user_id: &str, persona_id: &str) -> Result<UserMemory> {
    let user_id = user_id.to_owned();
    let persona_id = persona_id.to_owned();
    let at = encode_dt(Utc::now());
    let cap = i64::from(MAX_AFFINITY);

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO user_memory (user_id, persona_id, total_messages, affinity_score, facts, updated_at)
           VALUES (?1, ?2, 1, 1, '[]', ?3)
           ON CONFLICT (user_id, persona_id) DO UPDATE SET
             total_messages = total_messages + 1,
             affinity_score = MIN(affinity_score + 1, ?4),
             updated_at     = excluded.updated_at",
          rusqlite::params![user_id, persona_id, at, cap],
        )?;
        let sql = format!(
          "SELECT {MEMORY_COLUMNS} FROM user_memory WHERE user_id = ?1 AND persona_id = ?2"
        );
        Ok(conn.query_row(&sql, rusqlite::params![user_id, persona_id], RawMemory::from_row)?)
      })
      .await?;
    raw.into_memory()
  }

  async fn get_memory(&self, user_id: &str, persona_id: &str) -> Result<Option<UserMemory>> {
    let user_id = user_id.to_owned();
    let persona_id = persona_id.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {MEMORY_COLUMNS} FROM user_memory WHERE user_id = ?1 AND persona_id = ?2"
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![user_id, persona_id], RawMemory::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawMemory::into_memory).transpose()
  }

  async fn add_memory_fact(
    &self,
    user_id: &str,
    persona_id: &str,
    fact: &str,
  ) -> Result<UserMemory> {
    let uid = user_id.to_owned();
    let pid = persona_id.to_owned();
    let fact = fact.to_owned();
    let at = encode_dt(Utc::now());

    // Counters belong to `record_message`; only `facts` and `updated_at` are
    // written here.
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let stored: Option<String> = tx
          .query_row(
            "SELECT facts FROM user_memory WHERE user_id = ?1 AND persona_id = ?2",
            rusqlite::params![uid, pid],
            |r| r.get(0),
          )
          .optional()?;
        let mut facts: Vec<String> = match stored {
          Some(json) => serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
          })?,
          None => Vec::new(),
        };

        if remember_fact(&mut facts, &fact) {
          let json = serde_json::to_string(&facts)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
          tx.execute(
            "INSERT INTO user_memory (user_id, persona_id, total_messages, affinity_score, facts, updated_at)
             VALUES (?1, ?2, 0, 0, ?3, ?4)
             ON CONFLICT (user_id, persona_id) DO UPDATE SET
               facts      = excluded.facts,
               updated_at = excluded.updated_at",
            rusqlite::params![uid, pid, json, at],
          )?;
        }

        let sql = format!(
          "SELECT {MEMORY_COLUMNS} FROM user_memory WHERE user_id = ?1 AND persona_id = ?2"
        );
        let row = tx.query_row(&sql, rusqlite::params![uid, pid], RawMemory::from_row).optional()?;
        tx.commit()?;
        Ok(row)
      })
      .await?;

    match raw {
      Some(raw) => raw.into_memory(),
      None => Ok(UserMemory::new(user_id, persona_id)),
    }
  }

  async fn append_chat(&self, record: ChatRecord) -> Result<()> {
    let id = record.id.hyphenated().to_string();
    let role = record.role.as_ref().to_owned();
    let at = encode_dt(record.created_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO conversation_memory (record_id, user_id, persona_id, role, content, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id, record.user_id, record.persona_id, role, record.content, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn recent_chat(
    &self,
    user_id: &str,
    persona_id: &str,
    limit: usize,
  ) -> Result<Vec<ChatRecord>> {
    let user_id = user_id.to_owned();
    let persona_id = persona_id.to_owned();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT record_id, user_id, persona_id, role, content, created_at
           FROM conversation_memory
           WHERE user_id = ?1 AND persona_id = ?2
           ORDER BY seq DESC LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id, persona_id, limit], |r| {
            Ok(RawChat {
              record_id:  r.get(0)?,
              user_id:    r.get(1)?,
              persona_id: r.get(2)?,
              role:       r.get(3)?,
              content:    r.get(4)?,
              created_at: r.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut records = raws.into_iter().map(RawChat::into_record).collect::<Result<Vec<_>>>()?;
    records.reverse();
    Ok(records)
  }

  // ── Intimacy ──────────────────────────────────────────────────────────────

  async fn get_intimacy(&self, user_id: &str, persona_id: &str) -> Result<Intimacy> {
    let uid = user_id.to_owned();
    let pid = persona_id.to_owned();
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, persona_id, level, xp, updated_at FROM intimacy
               WHERE user_id = ?1 AND persona_id = ?2",
              rusqlite::params![uid, pid],
              |r| {
                Ok(RawIntimacy {
                  user_id:    r.get(0)?,
                  persona_id: r.get(1)?,
                  level:      r.get(2)?,
                  xp:         r.get(3)?,
                  updated_at: r.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    match raw {
      Some(raw) => raw.into_intimacy(),
      None => Ok(Intimacy::new(user_id, persona_id)),
    }
  }

  async fn gain_intimacy(
    &self,
    user_id: &str,
    persona_id: &str,
    xp: u32,
  ) -> Result<(Intimacy, LevelChange)> {
    let mut intimacy = Intimacy::new(user_id, persona_id);

    let gained = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let stored: Option<(i64, i64)> = tx
          .query_row(
            "SELECT level, xp FROM intimacy WHERE user_id = ?1 AND persona_id = ?2",
            rusqlite::params![intimacy.user_id, intimacy.persona_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        if let Some((level, points)) = stored {
          intimacy.level = level.clamp(i64::from(MIN_LEVEL), i64::from(MAX_LEVEL)) as u8;
          intimacy.xp = points.clamp(0, i64::from(XP_PER_LEVEL - 1)) as u32;
        }

        let change = intimacy.gain(xp);
        tx.execute(
          "INSERT INTO intimacy (user_id, persona_id, level, xp, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (user_id, persona_id) DO UPDATE SET
             level = excluded.level, xp = excluded.xp, updated_at = excluded.updated_at",
          rusqlite::params![
            intimacy.user_id,
            intimacy.persona_id,
            intimacy.level,
            intimacy.xp,
            encode_dt(intimacy.updated_at)
          ],
        )?;
        tx.commit()?;
        Ok((intimacy, change))
      })
      .await?;
    Ok(gained)
  }
}
