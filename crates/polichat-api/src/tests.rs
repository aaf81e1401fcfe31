//! Router tests against an in-memory SQLite store and a scripted provider.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use axum::{
  Router,
  body::{Body, to_bytes},
  http::{HeaderMap, Request, StatusCode, header},
};
use chrono::{Days, NaiveDate, Utc};
use polichat_core::{
  debate::{DebateKey, DebateMessage, DebateStyle, DebateType, Judgment, NewTranscript, Transcript, VersionedInsert},
  intimacy::{Intimacy, LevelChange},
  issue::{Issue, RssItem, SaveOutcome, TopicBrief, today_kst},
  memory::{ChatRecord, UserMemory},
  persona::{KnowledgeChunk, KnowledgeFile, Persona},
  store::PolichatStore,
};
use polichat_llm::{Completion, LlmRoutes, Provider, TextStream};
use polichat_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::{
  ApiConfig, ApiError, AppState, api_router,
  cache::save_next_version,
  feeds::StaticFeedSource,
  issues::{BackfillReport, ResearchResponse, ResearchStatus, WarmupReport},
  memory::MemoryView,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Answers completions by matching a needle in the system prompt and streams
/// a fixed list of chunks.
#[derive(Default)]
struct Scripted {
  replies:      Vec<(&'static str, String)>,
  chunks:       Vec<&'static str>,
  break_stream: bool,
  systems:      Mutex<Vec<String>>,
}

impl Scripted {
  fn reply(mut self, needle: &'static str, text: impl Into<String>) -> Self {
    self.replies.push((needle, text.into()));
    self
  }

  fn chunks(mut self, chunks: &[&'static str]) -> Self {
    self.chunks = chunks.to_vec();
    self
  }

  fn systems(&self) -> Vec<String> { self.systems.lock().unwrap().clone() }
}

#[async_trait]
impl Provider for Scripted {
  fn name(&self) -> &str { "scripted" }

  async fn complete(&self, request: &Completion) -> polichat_llm::Result<String> {
    self.systems.lock().unwrap().push(request.system.clone());
    self
      .replies
      .iter()
      .find(|(needle, _)| request.system.contains(needle))
      .map(|(_, reply)| reply.clone())
      .ok_or(polichat_llm::Error::EmptyResponse("scripted"))
  }

  async fn stream(&self, request: &Completion) -> polichat_llm::Result<TextStream> {
    self.systems.lock().unwrap().push(request.system.clone());
    let mut items: Vec<polichat_llm::Result<String>> =
      self.chunks.iter().map(|c| Ok(c.to_string())).collect();
    if self.break_stream {
      items.push(Err(polichat_llm::Error::Stream {
        provider: "scripted",
        message:  "connection reset".into(),
      }));
    }
    Ok(Box::pin(futures_util::stream::iter(items)))
  }
}

struct Harness {
  app:      Router,
  store:    Arc<SqliteStore>,
  provider: Arc<Scripted>,
}

async fn harness_with(provider: Scripted, config: ApiConfig, feed: Vec<RssItem>) -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  for (id, name) in [("kim", "김민준"), ("lee", "이서연")] {
    store
      .upsert_persona(Persona {
        id:           id.into(),
        name:         name.into(),
        party:        None,
        title:        None,
        tone:         None,
        catchphrases: vec![],
        stance:       "민생 우선".into(),
        updated_at:   Utc::now(),
      })
      .await
      .unwrap();
  }
  let provider = Arc::new(provider);
  let llm = LlmRoutes::uniform(provider.clone(), "test-model");
  let state = AppState::new(store.clone(), llm, Arc::new(StaticFeedSource(feed)), config);
  Harness { app: api_router(state), store, provider }
}

async fn harness(provider: Scripted) -> Harness { harness_with(provider, ApiConfig::default(), vec![]).await }

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
  Request::builder()
    .method(method)
    .uri(uri)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

fn get(uri: &str) -> Request<Body> { Request::builder().uri(uri).body(Body::empty()).unwrap() }

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let headers = response.headers().clone();
  let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  (status, headers, body.to_vec())
}

fn headline(title: &str, pub_date: Option<chrono::DateTime<Utc>>) -> RssItem {
  RssItem { title: title.into(), pub_date, ..Default::default() }
}

const ISSUE_REPLY: &str = r#"{"source_index": 1, "title": "최저임금 인상 논쟁", "summary": "내년도 최저임금을 두고 여야가 맞섰다.", "talking_points": ["물가", "고용"]}"#;

// ─── Basics ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_answers_ok() {
  let h = harness(Scripted::default()).await;
  let (status, _, body) = send(&h.app, get("/health")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "status": "ok" }));
}

#[tokio::test]
async fn persona_crud() {
  let h = harness(Scripted::default()).await;

  let body = json!({ "name": "박지훈", "party": "정의당", "catchphrases": ["노동이 먼저입니다"] });
  let (status, _, _) = send(&h.app, json_request("PUT", "/personas/park", body)).await;
  assert_eq!(status, StatusCode::OK);

  let (_, _, body) = send(&h.app, get("/personas")).await;
  assert_eq!(serde_json::from_slice::<Vec<Persona>>(&body).unwrap().len(), 3);

  let (status, _, body) = send(&h.app, json_request("PUT", "/personas/Park%20J", json!({ "name": "x" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(serde_json::from_slice::<Value>(&body).unwrap()["error"].is_string());

  let (status, _, _) = send(&h.app, json_request("PUT", "/personas/park", json!({ "name": " " }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let del = Request::builder().method("DELETE").uri("/personas/park").body(Body::empty()).unwrap();
  assert_eq!(send(&h.app, del).await.0, StatusCode::NO_CONTENT);
  assert_eq!(send(&h.app, get("/personas/park")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn knowledge_writes_refresh_identity() {
  let h = harness(Scripted::default()).await;
  assert_eq!(send(&h.app, get("/personas/kim/knowledge")).await.2, b"[]");

  let put = json_request("PUT", "/personas/kim/knowledge/policy.md", json!({ "content": "부동산 공급 확대" }));
  assert_eq!(send(&h.app, put).await.0, StatusCode::OK);

  let (_, _, body) = send(&h.app, get("/personas/kim/knowledge")).await;
  let files: Vec<KnowledgeFile> = serde_json::from_slice(&body).unwrap();
  assert_eq!(files.len(), 1);
  assert_eq!(files[0].name, "policy.md");

  let put = json_request("PUT", "/personas/ghost/knowledge/a.md", json!({ "content": "x" }));
  assert_eq!(send(&h.app, put).await.0, StatusCode::NOT_FOUND);
}

// ─── Chat ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_streams_and_records_the_exchange() {
  let h = harness(Scripted::default().chunks(&["안녕하세요", " 반갑습니다"])).await;
  let body = json!({
    "persona_id": "kim",
    "user_id": "u1",
    "messages": [{ "role": "user", "content": "요즘 어떠세요?" }],
  });
  let (status, headers, body) = send(&h.app, json_request("POST", "/chat", body)).await;
  assert_eq!(status, StatusCode::OK);
  assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/event-stream"));

  let text = String::from_utf8(body).unwrap();
  assert!(text.contains(r#"data: {"text":"안녕하세요"}"#));
  assert!(text.contains(r#"data: {"text":" 반갑습니다"}"#));
  assert!(text.trim_end().ends_with("data: [DONE]"));
  assert!(h.provider.systems()[0].contains("김민준"));

  let history = h.store.recent_chat("u1", "kim", 10).await.unwrap();
  let contents: Vec<&str> = history.iter().map(|r| r.content.as_str()).collect();
  assert_eq!(contents, vec!["요즘 어떠세요?", "안녕하세요 반갑습니다"]);

  let (_, _, body) = send(&h.app, get("/memory/u1/kim")).await;
  let view: MemoryView = serde_json::from_slice(&body).unwrap();
  assert_eq!(view.memory.unwrap().total_messages, 1);
  assert_eq!((view.intimacy.level, view.intimacy.xp), (1, 10));
}

#[tokio::test]
async fn broken_stream_reports_error_and_records_nothing() {
  let provider = Scripted { break_stream: true, ..Scripted::default().chunks(&["안녕"]) };
  let h = harness(provider).await;
  let body = json!({
    "persona_id": "kim",
    "user_id": "u1",
    "messages": [{ "role": "user", "content": "질문" }],
  });
  let (status, _, body) = send(&h.app, json_request("POST", "/chat", body)).await;
  assert_eq!(status, StatusCode::OK);

  let text = String::from_utf8(body).unwrap();
  assert!(text.contains(r#"data: {"error":"#));
  assert!(text.contains("data: [DONE]"));
  assert!(h.store.recent_chat("u1", "kim", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn chat_rejects_bad_requests() {
  let h = harness(Scripted::default()).await;

  let body = json!({ "persona_id": "kim", "messages": [{ "role": "assistant", "content": "안녕" }] });
  assert_eq!(send(&h.app, json_request("POST", "/chat", body)).await.0, StatusCode::BAD_REQUEST);

  let body = json!({ "persona_id": "ghost", "messages": [{ "role": "user", "content": "안녕" }] });
  assert_eq!(send(&h.app, json_request("POST", "/chat", body)).await.0, StatusCode::NOT_FOUND);
}

// ─── Debate ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn debate_turn_uses_cached_brief() {
  let h = harness(Scripted::default().chunks(&["저는 반대합니다."])).await;
  h.store
    .put_brief(TopicBrief {
      topic:      "기본소득 도입".into(),
      persona_id: "kim".into(),
      points:     vec!["재원 마련 방안".into()],
      created_at: Utc::now(),
    })
    .await
    .unwrap();

  let body = json!({ "topic": " 기본소득   도입", "style": "heated", "speaker": "kim", "opponent": "lee" });
  let (status, _, body) = send(&h.app, json_request("POST", "/debate", body)).await;
  assert_eq!(status, StatusCode::OK);
  assert!(String::from_utf8(body).unwrap().contains("저는 반대합니다."));
  assert!(h.provider.systems()[0].contains("재원 마련 방안"));

  let body = json!({ "topic": "기본소득", "speaker": "kim", "opponent": "kim" });
  assert_eq!(send(&h.app, json_request("POST", "/debate", body)).await.0, StatusCode::BAD_REQUEST);
  let body = json!({ "topic": "기본소득", "speaker": "kim", "opponent": "ghost" });
  assert_eq!(send(&h.app, json_request("POST", "/debate", body)).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn judge_parses_verdict_or_declares_draw() {
  let verdict = r#"심사 결과입니다. {"winner": "kim", "scores": {"kim": 82, "lee": 74}, "summary": "김 후보의 근거가 탄탄했습니다."}"#;
  let h = harness(Scripted::default().reply("심사위원", verdict)).await;
  let body = json!({
    "topic": "기본소득",
    "a": "kim",
    "b": "lee",
    "messages": [{ "speaker": "kim", "text": "찬성합니다." }, { "speaker": "lee", "text": "반대합니다." }],
  });
  let (_, _, out) = send(&h.app, json_request("POST", "/debate/judge", body.clone())).await;
  let judgment: Judgment = serde_json::from_slice(&out).unwrap();
  assert_eq!(judgment.winner.as_deref(), Some("kim"));
  assert_eq!(judgment.scores["lee"], 74);

  let h = harness(Scripted::default()).await;
  let (status, _, out) = send(&h.app, json_request("POST", "/debate/judge", body)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(serde_json::from_slice::<Judgment>(&out).unwrap(), Judgment::default());
}

#[tokio::test]
async fn moderator_falls_back_to_announcing_next_topic() {
  let h = harness(Scripted::default()).await;
  let body = json!({ "topic": "기본소득", "a": "kim", "b": "lee", "next_topic": "부동산 세제" });
  let (status, _, out) = send(&h.app, json_request("POST", "/debate/moderator", body)).await;
  assert_eq!(status, StatusCode::OK);
  let text = serde_json::from_slice::<Value>(&out).unwrap()["text"].as_str().unwrap().to_owned();
  assert!(text.contains("부동산 세제"));

  let h = harness(Scripted::default().reply("사회자", "사회자: 두 분 진정하세요.")).await;
  let body = json!({ "topic": "기본소득", "a": "kim", "b": "lee" });
  let (_, _, out) = send(&h.app, json_request("POST", "/debate/moderator", body)).await;
  assert_eq!(serde_json::from_slice::<Value>(&out).unwrap()["text"], "두 분 진정하세요.");
}

// ─── Debate cache ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cache_versions_and_etags() {
  let h = harness(Scripted::default()).await;
  let uri = "/debate/cache?topic=%EA%B8%B0%EB%B3%B8%EC%86%8C%EB%93%9D&style=calm&debate_type=topic";
  assert_eq!(send(&h.app, get(uri)).await.0, StatusCode::NOT_FOUND);

  let new = json!({
    "key": { "topic": "기본소득", "style": "calm", "debate_type": "topic" },
    "messages": [{ "speaker": "kim", "text": "찬성합니다." }],
  });
  for expected in [1, 2] {
    let (status, headers, body) = send(&h.app, json_request("POST", "/debate/cache", new.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(headers.contains_key(header::ETAG));
    assert_eq!(serde_json::from_slice::<Transcript>(&body).unwrap().version, expected);
  }

  let (status, headers, body) = send(&h.app, get(uri)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(serde_json::from_slice::<Transcript>(&body).unwrap().version, 2);
  let etag = headers[header::ETAG].to_str().unwrap().to_owned();

  let conditional = Request::builder().uri(uri).header(header::IF_NONE_MATCH, &etag).body(Body::empty()).unwrap();
  let (status, _, body) = send(&h.app, conditional).await;
  assert_eq!(status, StatusCode::NOT_MODIFIED);
  assert!(body.is_empty());

  let (_, _, body) = send(&h.app, get(&format!("{uri}&version=1"))).await;
  assert_eq!(serde_json::from_slice::<Transcript>(&body).unwrap().version, 1);

  let empty = json!({ "key": { "topic": "기본소득", "style": "calm", "debate_type": "topic" }, "messages": [] });
  assert_eq!(send(&h.app, json_request("POST", "/debate/cache", empty)).await.0, StatusCode::BAD_REQUEST);
}

/// A store where another writer takes the next version on each of the first
/// `conflicts` inserts.
struct ContendedStore {
  attempts:  AtomicU32,
  conflicts: u32,
}

impl ContendedStore {
  fn new(conflicts: u32) -> Self { Self { attempts: AtomicU32::new(0), conflicts } }
}

impl PolichatStore for ContendedStore {
  type Error = std::io::Error;

  async fn latest_version(&self, _: &DebateKey) -> Result<Option<u32>, Self::Error> {
    Ok(Some(self.attempts.load(Ordering::SeqCst)))
  }

  async fn insert_transcript(&self, new: NewTranscript, version: u32) -> Result<VersionedInsert, Self::Error> {
    if self.attempts.fetch_add(1, Ordering::SeqCst) < self.conflicts {
      return Ok(VersionedInsert::Conflict);
    }
    Ok(VersionedInsert::Inserted(Transcript {
      key: new.key,
      version,
      messages: new.messages,
      judgment: new.judgment,
      created_at: Utc::now(),
    }))
  }

  async fn upsert_persona(&self, _: Persona) -> Result<Persona, Self::Error> { unimplemented!() }
  async fn get_persona(&self, _: &str) -> Result<Option<Persona>, Self::Error> { unimplemented!() }
  async fn list_personas(&self) -> Result<Vec<Persona>, Self::Error> { unimplemented!() }
  async fn delete_persona(&self, _: &str) -> Result<bool, Self::Error> { unimplemented!() }
  async fn put_knowledge(&self, _: KnowledgeFile) -> Result<KnowledgeFile, Self::Error> { unimplemented!() }
  async fn list_knowledge(&self, _: &str) -> Result<Vec<KnowledgeFile>, Self::Error> { unimplemented!() }
  async fn delete_knowledge(&self, _: &str, _: &str) -> Result<bool, Self::Error> { unimplemented!() }
  async fn search_knowledge(&self, _: &str, _: &str, _: usize) -> Result<Vec<KnowledgeChunk>, Self::Error> {
    unimplemented!()
  }
  async fn latest_transcript(&self, _: &DebateKey) -> Result<Option<Transcript>, Self::Error> { unimplemented!() }
  async fn get_transcript(&self, _: &DebateKey, _: u32) -> Result<Option<Transcript>, Self::Error> {
    unimplemented!()
  }
  async fn save_issue(&self, _: Issue, _: bool) -> Result<SaveOutcome, Self::Error> { unimplemented!() }
  async fn get_issue(&self, _: NaiveDate) -> Result<Option<Issue>, Self::Error> { unimplemented!() }
  async fn list_issues(&self, _: usize) -> Result<Vec<Issue>, Self::Error> { unimplemented!() }
  async fn put_brief(&self, _: TopicBrief) -> Result<(), Self::Error> { unimplemented!() }
  async fn get_brief(&self, _: &str, _: &str) -> Result<Option<TopicBrief>, Self::Error> { unimplemented!() }
  async fn record_message(&self, _: &str, _: &str) -> Result<UserMemory, Self::Error> { unimplemented!() }
  async fn get_memory(&self, _: &str, _: &str) -> Result<Option<UserMemory>, Self::Error> { unimplemented!() }
  async fn add_memory_fact(&self, _: &str, _: &str, _: &str) -> Result<UserMemory, Self::Error> {
    unimplemented!()
  }
  async fn append_chat(&self, _: ChatRecord) -> Result<(), Self::Error> { unimplemented!() }
  async fn recent_chat(&self, _: &str, _: &str, _: usize) -> Result<Vec<ChatRecord>, Self::Error> {
    unimplemented!()
  }
  async fn get_intimacy(&self, _: &str, _: &str) -> Result<Intimacy, Self::Error> { unimplemented!() }
  async fn gain_intimacy(&self, _: &str, _: &str, _: u32) -> Result<(Intimacy, LevelChange), Self::Error> {
    unimplemented!()
  }
}

fn contended_transcript() -> NewTranscript {
  NewTranscript {
    key:      DebateKey::new("기본소득", DebateStyle::Calm, DebateType::Topic),
    messages: vec![DebateMessage::turn("kim", "찬성합니다."), DebateMessage::turn("lee", "반대합니다.")],
    judgment: None,
  }
}

#[tokio::test]
async fn exhausted_version_retries_are_a_server_error() {
  let store = ContendedStore::new(u32::MAX);
  let err = save_next_version(&store, contended_transcript()).await.unwrap_err();
  assert!(matches!(err, ApiError::Internal(_)));
  assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn version_conflict_rereads_and_saves_next() {
  let store = ContendedStore::new(1);
  let new = contended_transcript();
  let saved = save_next_version(&store, new.clone()).await.unwrap();
  assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
  assert_eq!(saved.version, 2);
  assert_eq!(saved.key, new.key);
  assert_eq!(saved.messages, new.messages);
}

// ─── Issues ──────────────────────────────────────────────────────────────────

fn todays_feed() -> Vec<RssItem> {
  vec![
    headline("최저임금 인상 두고 여야 정면 충돌 - 연합뉴스", None),
    headline("짧은 제목", None),
  ]
}

#[tokio::test]
async fn research_saves_then_serves_from_cache() {
  let provider = Scripted::default().reply("작가", ISSUE_REPLY);
  let h = harness_with(provider, ApiConfig::default(), todays_feed()).await;
  assert_eq!(send(&h.app, get("/issues/today")).await.0, StatusCode::NOT_FOUND);

  let (status, _, body) = send(&h.app, json_request("POST", "/issues/research", json!({}))).await;
  assert_eq!(status, StatusCode::OK);
  let first: ResearchResponse = serde_json::from_slice(&body).unwrap();
  assert_eq!(first.status, ResearchStatus::Inserted);
  assert_eq!(first.issue.title, "최저임금 인상 논쟁");
  assert_eq!(first.issue.date, today_kst());

  let (_, _, body) = send(&h.app, json_request("POST", "/issues/research", json!({ "force": false }))).await;
  assert_eq!(serde_json::from_slice::<ResearchResponse>(&body).unwrap().status, ResearchStatus::Cached);

  let (_, _, body) = send(&h.app, json_request("POST", "/issues/research", json!({ "force": true }))).await;
  assert_eq!(serde_json::from_slice::<ResearchResponse>(&body).unwrap().status, ResearchStatus::Replaced);

  let (status, _, body) = send(&h.app, get("/issues/today")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(serde_json::from_slice::<Issue>(&body).unwrap().talking_points, vec!["물가", "고용"]);

  let (_, _, body) = send(&h.app, get("/issues/history?limit=500")).await;
  assert_eq!(serde_json::from_slice::<Vec<Issue>>(&body).unwrap().len(), 1);

  assert_eq!(send(&h.app, get("/issues/2024-13-01")).await.0, StatusCode::BAD_REQUEST);
  assert_eq!(send(&h.app, get("/issues/2001-01-01")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn research_without_headlines_is_upstream_error() {
  let h = harness_with(Scripted::default(), ApiConfig::default(), vec![headline("짧다", None)]).await;
  let (status, _, _) = send(&h.app, json_request("POST", "/issues/research", json!({}))).await;
  assert_eq!(status, StatusCode::BAD_GATEWAY);
}

fn with_secret() -> ApiConfig { ApiConfig { warmup_secret: Some("s3cret".into()), ..ApiConfig::default() } }

fn authed(uri: &str, body: Value) -> Request<Body> {
  let mut request = json_request("POST", uri, body);
  request.headers_mut().insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
  request
}

#[tokio::test]
async fn warmup_requires_secret() {
  let h = harness(Scripted::default()).await;
  assert_eq!(send(&h.app, authed("/issues/warmup", json!({}))).await.0, StatusCode::UNAUTHORIZED);

  let h = harness_with(Scripted::default(), with_secret(), vec![]).await;
  let (status, _, body) = send(&h.app, json_request("POST", "/issues/backfill", json!({}))).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["error"], "unauthorized");
}

#[tokio::test]
async fn warmup_writes_one_brief_per_persona() {
  let provider = Scripted::default()
    .reply("작가", ISSUE_REPLY)
    .reply("보좌관", r#"["물가 안정이 먼저", "고용 충격 완화"]"#);
  let h = harness_with(provider, with_secret(), todays_feed()).await;

  let (status, _, body) = send(&h.app, authed("/issues/warmup", json!({}))).await;
  assert_eq!(status, StatusCode::OK);
  let mut report: WarmupReport = serde_json::from_slice(&body).unwrap();
  report.warmed.sort();
  assert_eq!(report.topic, "최저임금 인상 논쟁");
  assert_eq!(report.warmed, vec!["kim", "lee"]);

  let brief = h.store.get_brief("최저임금 인상 논쟁", "lee").await.unwrap().unwrap();
  assert_eq!(brief.points, vec!["물가 안정이 먼저", "고용 충격 완화"]);

  let (_, _, body) = send(&h.app, authed("/issues/warmup", json!({}))).await;
  let report: WarmupReport = serde_json::from_slice(&body).unwrap();
  assert!(report.warmed.is_empty());
  assert_eq!(report.skipped.len(), 2);
}

#[tokio::test]
async fn backfill_fills_only_days_with_headlines() {
  let yesterday = today_kst().checked_sub_days(Days::new(1)).unwrap();
  let two_days_ago = today_kst().checked_sub_days(Days::new(2)).unwrap();
  let feed = vec![headline("국민연금 개혁안 국회 본회의 통과", Some(Utc::now() - chrono::Duration::days(1)))];
  let h = harness_with(Scripted::default().reply("작가", ISSUE_REPLY), with_secret(), feed).await;

  let (status, _, body) = send(&h.app, authed("/issues/backfill", json!({ "days": 2 }))).await;
  assert_eq!(status, StatusCode::OK);
  let report: BackfillReport = serde_json::from_slice(&body).unwrap();
  assert_eq!(report.filled, vec![yesterday]);
  assert_eq!(report.skipped, vec![two_days_ago]);
  assert!(h.store.get_issue(yesterday).await.unwrap().is_some());

  let (_, _, body) = send(&h.app, authed("/issues/backfill", json!({ "days": 2 }))).await;
  let report: BackfillReport = serde_json::from_slice(&body).unwrap();
  assert!(report.filled.is_empty());
}

// ─── Memory ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn facts_are_remembered() {
  let h = harness(Scripted::default()).await;
  let uri = "/memory/u1/kim/facts";
  assert_eq!(send(&h.app, json_request("POST", uri, json!({ "fact": "  " }))).await.0, StatusCode::BAD_REQUEST);

  let (status, _, body) = send(&h.app, json_request("POST", uri, json!({ "fact": "부산 출신" }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(serde_json::from_slice::<UserMemory>(&body).unwrap().facts, vec!["부산 출신"]);

  let (_, _, body) = send(&h.app, get("/memory/u1/kim")).await;
  let view: MemoryView = serde_json::from_slice(&body).unwrap();
  assert_eq!(view.intimacy.level, 1);
  assert_eq!(view.memory.unwrap().facts, vec!["부산 출신"]);

  assert_eq!(send(&h.app, get("/history/u1/kim?limit=5")).await.2, b"[]");
}
