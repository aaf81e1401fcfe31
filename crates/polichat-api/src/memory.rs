//! What a persona remembers about a user.
//!
//! | Method | Path                                     | Notes                      |
//! |--------|------------------------------------------|----------------------------|
//! | `GET`  | `/memory/{user_id}/{persona_id}`         | `{memory, intimacy}`       |
//! | `POST` | `/memory/{user_id}/{persona_id}/facts`   | `{fact}`                   |
//! | `GET`  | `/history/{user_id}/{persona_id}`        | `?limit=` (default 50)     |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use polichat_core::{
  intimacy::Intimacy,
  memory::{ChatRecord, UserMemory},
  store::PolichatStore,
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

pub const DEFAULT_HISTORY: usize = 50;
pub const MAX_HISTORY: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryView {
  pub memory:   Option<UserMemory>,
  pub intimacy: Intimacy,
}

#[derive(Debug, Deserialize)]
pub struct FactBody {
  pub fact: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
  pub limit: Option<usize>,
}

pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path((user_id, persona_id)): Path<(String, String)>,
) -> Result<Json<MemoryView>, ApiError>
where
  S: PolichatStore + 'static,
{
  let memory = state.store.get_memory(&user_id, &persona_id).await.map_err(ApiError::store)?;
  let intimacy = state.store.get_intimacy(&user_id, &persona_id).await.map_err(ApiError::store)?;
  Ok(Json(MemoryView { memory, intimacy }))
}

pub async fn add_fact<S>(
  State(state): State<AppState<S>>,
  Path((user_id, persona_id)): Path<(String, String)>,
  Json(body): Json<FactBody>,
) -> Result<Json<UserMemory>, ApiError>
where
  S: PolichatStore + 'static,
{
  let fact = body.fact.trim();
  if fact.is_empty() {
    return Err(ApiError::BadRequest("fact must not be empty".into()));
  }
  state
    .store
    .add_memory_fact(&user_id, &persona_id, fact)
    .await
    .map(Json)
    .map_err(ApiError::store)
}

pub async fn history<S>(
  State(state): State<AppState<S>>,
  Path((user_id, persona_id)): Path<(String, String)>,
  Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatRecord>>, ApiError>
where
  S: PolichatStore + 'static,
{
  let limit = q.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
  state
    .store
    .recent_chat(&user_id, &persona_id, limit)
    .await
    .map(Json)
    .map_err(ApiError::store)
}
