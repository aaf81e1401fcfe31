//! One-on-one chat with a persona.
//!
//! | Method | Path    | Notes                                                   |
//! |--------|---------|---------------------------------------------------------|
//! | `POST` | `/chat` | SSE reply; with `user_id`, memory and intimacy update    |
//!
//! The system prompt is assembled per request from the persona, its knowledge
//! files, the chunks most relevant to the last user message, and what the
//! persona remembers about the user. Side effects run only once the reply
//! finished streaming.

use axum::{
  Json,
  extract::State,
  response::{IntoResponse, Response},
};
use polichat_core::{
  memory::ChatRecord,
  message::{ChatMessage, Role, last_user_message},
  persona::SystemPrompt,
  store::PolichatStore,
};
use polichat_llm::Completion;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
  AppState,
  error::ApiError,
  sse::{relay, relay_plain},
};

/// Most recent messages forwarded to the model.
pub const CHAT_WINDOW: usize = 20;
const RETRIEVED_CHUNKS: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
  pub persona_id: String,
  #[serde(default)]
  pub user_id:    Option<String>,
  pub messages:   Vec<ChatMessage>,
}

pub async fn handler<S>(
  State(state): State<AppState<S>>,
  Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError>
where
  S: PolichatStore + 'static,
{
  let question = last_user_message(&req.messages)?.content.clone();
  let identity = state.identity(&req.persona_id).await?;
  let user_id = req.user_id.filter(|u| !u.trim().is_empty());

  let (memory, intimacy) = match &user_id {
    Some(user) => (
      state.store.get_memory(user, &req.persona_id).await.map_err(ApiError::store)?,
      Some(state.store.get_intimacy(user, &req.persona_id).await.map_err(ApiError::store)?),
    ),
    None => (None, None),
  };

  let retrieved = state
    .store
    .search_knowledge(&req.persona_id, &question, RETRIEVED_CHUNKS)
    .await
    .unwrap_or_else(|e| {
      warn!(persona = %req.persona_id, error = %e, "knowledge search failed");
      Vec::new()
    });

  let system = SystemPrompt::new(&identity.persona)
    .knowledge(&identity.knowledge)
    .retrieved(&retrieved)
    .memory(memory.as_ref())
    .intimacy(intimacy.as_ref())
    .build();

  let route = state.llm.route(polichat_llm::Role::Chat);
  let completion = Completion::new(route.model.clone(), system, window(&req.messages));
  let stream = route.provider.stream(&completion).await?;

  let Some(user_id) = user_id else {
    return Ok(relay_plain(stream).into_response());
  };

  let store = state.store.clone();
  let persona_id = req.persona_id;
  let xp = state.config.chat_xp;
  let sse = relay(stream, move |reply| async move {
    if let Err(e) = record_exchange(&*store, &user_id, &persona_id, &question, &reply, xp).await {
      warn!(user = %user_id, persona = %persona_id, error = %e, "failed to record chat");
    }
  });
  Ok(sse.into_response())
}

/// The tail of the conversation, starting at a user message.
fn window(messages: &[ChatMessage]) -> Vec<ChatMessage> {
  let start = messages.len().saturating_sub(CHAT_WINDOW);
  messages[start..]
    .iter()
    .skip_while(|m| m.role != Role::User)
    .cloned()
    .collect()
}

async fn record_exchange<S: PolichatStore>(
  store: &S,
  user_id: &str,
  persona_id: &str,
  question: &str,
  reply: &str,
  xp: u32,
) -> Result<(), S::Error> {
  store
    .append_chat(ChatRecord::new(user_id, persona_id, &ChatMessage::user(question)))
    .await?;
  if !reply.trim().is_empty() {
    store
      .append_chat(ChatRecord::new(user_id, persona_id, &ChatMessage::assistant(reply)))
      .await?;
  }
  store.record_message(user_id, persona_id).await?;

  let (_, change) = store.gain_intimacy(user_id, persona_id, xp).await?;
  if change.leveled_up() {
    info!(user = %user_id, persona = %persona_id, level = change.to, "intimacy level up");
  }
  Ok(())
}
