//! Persona and knowledge-file handlers.
//!
//! | Method   | Path                              | Notes                     |
//! |----------|-----------------------------------|---------------------------|
//! | `GET`    | `/personas`                       | All personas, by name     |
//! | `GET`    | `/personas/{id}`                  |                           |
//! | `PUT`    | `/personas/{id}`                  | Create or replace         |
//! | `DELETE` | `/personas/{id}`                  | Also drops knowledge      |
//! | `GET`    | `/personas/{id}/knowledge`        |                           |
//! | `PUT`    | `/personas/{id}/knowledge/{name}` | `{content}`               |
//! | `DELETE` | `/personas/{id}/knowledge/{name}` |                           |
//!
//! Every write drops the persona from the identity cache.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use chrono::Utc;
use polichat_core::{
  persona::{KnowledgeFile, Persona, validate_id},
  store::PolichatStore,
};
use serde::Deserialize;
use tracing::info;

use crate::{AppState, error::ApiError};

const MAX_KNOWLEDGE_NAME: usize = 128;

#[derive(Debug, Deserialize)]
pub struct PersonaBody {
  pub name:         String,
  #[serde(default)]
  pub party:        Option<String>,
  #[serde(default)]
  pub title:        Option<String>,
  #[serde(default)]
  pub tone:         Option<String>,
  #[serde(default)]
  pub catchphrases: Vec<String>,
  #[serde(default)]
  pub stance:       String,
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeBody {
  pub content: String,
}

fn validate_knowledge_name(name: &str) -> Result<(), ApiError> {
  let valid = !name.trim().is_empty()
    && name.len() <= MAX_KNOWLEDGE_NAME
    && !name.contains(['/', '\\'])
    && name != "."
    && name != "..";
  if valid { Ok(()) } else { Err(ApiError::BadRequest(format!("invalid knowledge file name {name:?}"))) }
}

// ─── Personas ────────────────────────────────────────────────────────────────

pub async fn list<S>(State(state): State<AppState<S>>) -> Result<Json<Vec<Persona>>, ApiError>
where
  S: PolichatStore + 'static,
{
  state.store.list_personas().await.map(Json).map_err(ApiError::store)
}

pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Persona>, ApiError>
where
  S: PolichatStore + 'static,
{
  state.identity(&id).await.map(|identity| Json(identity.persona))
}

pub async fn upsert<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  Json(body): Json<PersonaBody>,
) -> Result<Json<Persona>, ApiError>
where
  S: PolichatStore + 'static,
{
  validate_id(&id)?;
  if body.name.trim().is_empty() {
    return Err(ApiError::BadRequest("persona name is required".into()));
  }

  let persona = Persona {
    id:           id.clone(),
    name:         body.name.trim().to_owned(),
    party:        body.party,
    title:        body.title,
    tone:         body.tone,
    catchphrases: body.catchphrases,
    stance:       body.stance,
    updated_at:   Utc::now(),
  };
  let saved = state.store.upsert_persona(persona).await.map_err(ApiError::store)?;
  state.forget_identity(&id);
  info!(persona = %id, "persona saved");
  Ok(Json(saved))
}

pub async fn delete_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
  S: PolichatStore + 'static,
{
  let deleted = state.store.delete_persona(&id).await.map_err(ApiError::store)?;
  state.forget_identity(&id);
  if !deleted {
    return Err(ApiError::NotFound(format!("persona {id}")));
  }
  info!(persona = %id, "persona deleted");
  Ok(StatusCode::NO_CONTENT)
}

// ─── Knowledge ───────────────────────────────────────────────────────────────

pub async fn list_knowledge<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Vec<KnowledgeFile>>, ApiError>
where
  S: PolichatStore + 'static,
{
  state.identity(&id).await.map(|identity| Json(identity.knowledge))
}

pub async fn put_knowledge<S>(
  State(state): State<AppState<S>>,
  Path((id, name)): Path<(String, String)>,
  Json(body): Json<KnowledgeBody>,
) -> Result<Json<KnowledgeFile>, ApiError>
where
  S: PolichatStore + 'static,
{
  validate_knowledge_name(&name)?;
  if state.store.get_persona(&id).await.map_err(ApiError::store)?.is_none() {
    return Err(ApiError::NotFound(format!("persona {id}")));
  }

  let file = KnowledgeFile { persona_id: id.clone(), name, content: body.content, updated_at: Utc::now() };
  let saved = state.store.put_knowledge(file).await.map_err(ApiError::store)?;
  state.forget_identity(&id);
  Ok(Json(saved))
}

pub async fn delete_knowledge<S>(
  State(state): State<AppState<S>>,
  Path((id, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError>
where
  S: PolichatStore + 'static,
{
  let deleted = state.store.delete_knowledge(&id, &name).await.map_err(ApiError::store)?;
  state.forget_identity(&id);
  if !deleted {
    return Err(ApiError::NotFound(format!("knowledge file {name} of {id}")));
  }
  Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn knowledge_names_stay_flat() {
    assert!(validate_knowledge_name("speech-style.md").is_ok());
    assert!(validate_knowledge_name("정책 요약.md").is_ok());
    assert!(validate_knowledge_name("../etc/passwd").is_err());
    assert!(validate_knowledge_name("a\\b.md").is_err());
    assert!(validate_knowledge_name("  ").is_err());
  }
}
