//! The `PolichatStore` trait.
//!
//! Implemented by storage backends (e.g. `polichat-store-sqlite`). The HTTP
//! layer depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::NaiveDate;

use crate::{
  debate::{DebateKey, NewTranscript, Transcript, VersionedInsert},
  intimacy::{Intimacy, LevelChange},
  issue::{Issue, SaveOutcome, TopicBrief},
  memory::{ChatRecord, UserMemory},
  persona::{KnowledgeChunk, KnowledgeFile, Persona},
};

/// Abstraction over a Polichat storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait PolichatStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Personas ──────────────────────────────────────────────────────────

  /// Insert or replace a persona. `updated_at` is set by the store.
  fn upsert_persona(
    &self,
    persona: Persona,
  ) -> impl Future<Output = Result<Persona, Self::Error>> + Send + '_;

  fn get_persona<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Persona>, Self::Error>> + Send + 'a;

  fn list_personas(&self) -> impl Future<Output = Result<Vec<Persona>, Self::Error>> + Send + '_;

  /// Delete a persona and its knowledge files. Returns `false` if absent.
  fn delete_persona<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Knowledge ─────────────────────────────────────────────────────────

  /// Insert or replace a knowledge file, keyed by `(persona_id, name)`.
  fn put_knowledge(
    &self,
    file: KnowledgeFile,
  ) -> impl Future<Output = Result<KnowledgeFile, Self::Error>> + Send + '_;

  fn list_knowledge<'a>(
    &'a self,
    persona_id: &'a str,
  ) -> impl Future<Output = Result<Vec<KnowledgeFile>, Self::Error>> + Send + 'a;

  fn delete_knowledge<'a>(
    &'a self,
    persona_id: &'a str,
    name: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Knowledge chunks that mention any term of `query`, best match first.
  fn search_knowledge<'a>(
    &'a self,
    persona_id: &'a str,
    query: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<KnowledgeChunk>, Self::Error>> + Send + 'a;

  // ── Debate cache ──────────────────────────────────────────────────────

  fn latest_version<'a>(
    &'a self,
    key: &'a DebateKey,
  ) -> impl Future<Output = Result<Option<u32>, Self::Error>> + Send + 'a;

  /// Insert a transcript at exactly `version`. A concurrent writer that took
  /// the same version yields [`VersionedInsert::Conflict`], not an error.
  fn insert_transcript(
    &self,
    transcript: NewTranscript,
    version: u32,
  ) -> impl Future<Output = Result<VersionedInsert, Self::Error>> + Send + '_;

  fn latest_transcript<'a>(
    &'a self,
    key: &'a DebateKey,
  ) -> impl Future<Output = Result<Option<Transcript>, Self::Error>> + Send + 'a;

  fn get_transcript<'a>(
    &'a self,
    key: &'a DebateKey,
    version: u32,
  ) -> impl Future<Output = Result<Option<Transcript>, Self::Error>> + Send + 'a;

  // ── Issues ────────────────────────────────────────────────────────────

  /// Persist the issue for `issue.date`. An existing row for that date is
  /// only replaced when `force` is set.
  fn save_issue(
    &self,
    issue: Issue,
    force: bool,
  ) -> impl Future<Output = Result<SaveOutcome, Self::Error>> + Send + '_;

  fn get_issue(
    &self,
    date: NaiveDate,
  ) -> impl Future<Output = Result<Option<Issue>, Self::Error>> + Send + '_;

  /// Most recent issues, newest first.
  fn list_issues(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Issue>, Self::Error>> + Send + '_;

  // ── Briefs ────────────────────────────────────────────────────────────

  fn put_brief(&self, brief: TopicBrief)
  -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_brief<'a>(
    &'a self,
    topic: &'a str,
    persona_id: &'a str,
  ) -> impl Future<Output = Result<Option<TopicBrief>, Self::Error>> + Send + 'a;

  // ── Memory and history ────────────────────────────────────────────────

  /// Count one user message towards the memory row, creating it if needed.
  fn record_message<'a>(
    &'a self,
    user_id: &'a str,
    persona_id: &'a str,
  ) -> impl Future<Output = Result<UserMemory, Self::Error>> + Send + 'a;

  fn get_memory<'a>(
    &'a self,
    user_id: &'a str,
    persona_id: &'a str,
  ) -> impl Future<Output = Result<Option<UserMemory>, Self::Error>> + Send + 'a;

  /// Remember `fact` for the pair. Counters are left as they are.
  fn add_memory_fact<'a>(
    &'a self,
    user_id: &'a str,
    persona_id: &'a str,
    fact: &'a str,
  ) -> impl Future<Output = Result<UserMemory, Self::Error>> + Send + 'a;

  fn append_chat(&self, record: ChatRecord)
  -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The last `limit` records in chronological order.
  fn recent_chat<'a>(
    &'a self,
    user_id: &'a str,
    persona_id: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ChatRecord>, Self::Error>> + Send + 'a;

  // ── Intimacy ──────────────────────────────────────────────────────────

  /// The stored intimacy row, or a fresh level-1 row when none exists.
  fn get_intimacy<'a>(
    &'a self,
    user_id: &'a str,
    persona_id: &'a str,
  ) -> impl Future<Output = Result<Intimacy, Self::Error>> + Send + 'a;

  /// Add `xp` and persist the result in one step, starting from a level-1
  /// row when none exists.
  fn gain_intimacy<'a>(
    &'a self,
    user_id: &'a str,
    persona_id: &'a str,
    xp: u32,
  ) -> impl Future<Output = Result<(Intimacy, LevelChange), Self::Error>> + Send + 'a;
}
