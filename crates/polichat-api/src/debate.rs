//! Debate turns, judging and moderation.
//!
//! | Method | Path                 | Notes                                        |
//! |--------|----------------------|----------------------------------------------|
//! | `POST` | `/debate`            | SSE; one turn for `speaker` against `opponent` |
//! | `POST` | `/debate/judge`      | Always answers; draw when the judge fails     |
//! | `POST` | `/debate/moderator`  | Always answers; canned line when it fails     |

use axum::{
  Json,
  extract::State,
  response::{IntoResponse, Response},
};
use polichat_core::{
  debate::{
    DebateMessage, DebateStyle, Judgment, MODERATOR_NAME, TurnContext, clean_turn_text,
    judge_prompt, moderator_fallback, moderator_prompt, normalize_topic, parse_judgment,
  },
  store::PolichatStore,
};
use polichat_llm::{Completion, Role};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AppState, error::ApiError, sse::relay_plain};

const JUDGE_TEMPERATURE: f32 = 0.2;
const MODERATOR_MAX_TOKENS: u32 = 300;

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
  pub topic:    String,
  #[serde(default)]
  pub style:    DebateStyle,
  pub speaker:  String,
  pub opponent: String,
  #[serde(default)]
  pub history:  Vec<DebateMessage>,
}

#[derive(Debug, Deserialize)]
pub struct JudgeRequest {
  pub topic:    String,
  pub a:        String,
  pub b:        String,
  #[serde(default)]
  pub messages: Vec<DebateMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ModeratorRequest {
  pub topic:      String,
  pub a:          String,
  pub b:          String,
  #[serde(default)]
  pub messages:   Vec<DebateMessage>,
  #[serde(default)]
  pub next_topic: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeratorReply {
  pub text: String,
}

fn require_topic(topic: &str) -> Result<String, ApiError> {
  let topic = normalize_topic(topic);
  if topic.is_empty() {
    return Err(ApiError::BadRequest("topic is required".into()));
  }
  Ok(topic)
}

// ─── Turn ────────────────────────────────────────────────────────────────────

pub async fn turn<S>(
  State(state): State<AppState<S>>,
  Json(req): Json<TurnRequest>,
) -> Result<Response, ApiError>
where
  S: PolichatStore + 'static,
{
  let topic = require_topic(&req.topic)?;
  if req.speaker == req.opponent {
    return Err(ApiError::BadRequest("speaker and opponent must differ".into()));
  }
  let speaker = state.identity(&req.speaker).await?.persona;
  let opponent = state.identity(&req.opponent).await?.persona;

  let brief = state.store.get_brief(&topic, &speaker.id).await.unwrap_or_else(|e| {
    warn!(%topic, speaker = %speaker.id, error = %e, "brief lookup failed");
    None
  });

  let prompt = TurnContext {
    topic:    &topic,
    style:    req.style,
    speaker:  &speaker,
    opponent: &opponent,
    history:  &req.history,
    brief:    brief.as_ref(),
  }
  .prompt();

  let route = state.llm.route(Role::Debate);
  let stream = route.provider.stream(&Completion::from_prompt(route.model.clone(), &prompt)).await?;
  Ok(relay_plain(stream).into_response())
}

// ─── Judge ───────────────────────────────────────────────────────────────────

pub async fn judge<S>(
  State(state): State<AppState<S>>,
  Json(req): Json<JudgeRequest>,
) -> Result<Json<Judgment>, ApiError>
where
  S: PolichatStore + 'static,
{
  let topic = require_topic(&req.topic)?;
  let a = state.identity(&req.a).await?.persona;
  let b = state.identity(&req.b).await?.persona;
  if req.messages.is_empty() {
    return Ok(Json(Judgment::default()));
  }

  let prompt = judge_prompt(&topic, &a, &b, &req.messages);
  let route = state.llm.route(Role::Judge);
  let completion = Completion::from_prompt(route.model.clone(), &prompt).temperature(JUDGE_TEMPERATURE);
  let judgment = match route.provider.complete(&completion).await {
    Ok(text) => parse_judgment(&text, &[a.id.as_str(), b.id.as_str()]),
    Err(e) => {
      warn!(%topic, error = %e, "judge unavailable, declaring a draw");
      Judgment::default()
    }
  };
  Ok(Json(judgment))
}

// ─── Moderator ───────────────────────────────────────────────────────────────

pub async fn moderator<S>(
  State(state): State<AppState<S>>,
  Json(req): Json<ModeratorRequest>,
) -> Result<Json<ModeratorReply>, ApiError>
where
  S: PolichatStore + 'static,
{
  let topic = require_topic(&req.topic)?;
  let a = state.identity(&req.a).await?.persona;
  let b = state.identity(&req.b).await?.persona;
  let next_topic = req.next_topic.as_deref().map(str::trim).filter(|t| !t.is_empty());

  let prompt = moderator_prompt(&topic, &a, &b, &req.messages, next_topic);
  let route = state.llm.route(Role::Moderator);
  let completion = Completion::from_prompt(route.model.clone(), &prompt).max_tokens(MODERATOR_MAX_TOKENS);
  let text = match route.provider.complete(&completion).await {
    Ok(text) => clean_turn_text(&text, MODERATOR_NAME),
    Err(e) => {
      warn!(%topic, error = %e, "moderator unavailable, using fallback line");
      String::new()
    }
  };
  let text = if text.is_empty() { moderator_fallback(next_topic) } else { text };
  Ok(Json(ModeratorReply { text }))
}
