//! JSON + SSE API for Polichat.
//!
//! Exposes an axum [`Router`] backed by any [`polichat_core::store::PolichatStore`]
//! and a set of [`LlmRoutes`]. TLS and transport concerns are the caller's
//! responsibility; only the warmup and backfill endpoints are authenticated.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", polichat_api::api_router(state))
//! ```

pub mod auth;
pub mod cache;
pub mod chat;
pub mod debate;
pub mod error;
pub mod feeds;
pub mod issues;
pub mod memory;
pub mod personas;
pub mod sse;
pub mod ttl;

#[cfg(test)]
mod tests;

use std::{sync::Arc, time::Duration};

use axum::{
  Json, Router,
  routing::{get, post, put},
};
use chrono::NaiveDate;
use polichat_core::{
  issue::Issue,
  persona::{KnowledgeFile, Persona},
  store::PolichatStore,
};
use polichat_llm::LlmRoutes;
use serde_json::{Value, json};

pub use error::ApiError;
pub use feeds::{FeedSource, HttpFeedSource};

use crate::ttl::TtlCache;

/// Tunables the handlers need beyond the store and the models.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  /// Bearer secret for warmup and backfill. `None` locks both endpoints.
  pub warmup_secret: Option<String>,
  pub identity_ttl:  Duration,
  pub research_ttl:  Duration,
  /// Intimacy XP awarded per completed chat exchange.
  pub chat_xp:       u32,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      warmup_secret: None,
      identity_ttl:  Duration::from_secs(600),
      research_ttl:  Duration::from_secs(1800),
      chat_xp:       10,
    }
  }
}

/// A persona together with its knowledge files.
#[derive(Debug, Clone)]
pub struct Identity {
  pub persona:   Persona,
  pub knowledge: Vec<KnowledgeFile>,
}

/// Shared state for every handler.
pub struct AppState<S> {
  pub store:  Arc<S>,
  pub llm:    Arc<LlmRoutes>,
  pub feeds:  Arc<dyn FeedSource>,
  pub config: Arc<ApiConfig>,
  identities: Arc<TtlCache<String, Identity>>,
  research:   Arc<TtlCache<NaiveDate, Issue>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      llm:        self.llm.clone(),
      feeds:      self.feeds.clone(),
      config:     self.config.clone(),
      identities: self.identities.clone(),
      research:   self.research.clone(),
    }
  }
}

impl<S: PolichatStore> AppState<S> {
  pub fn new(store: Arc<S>, llm: LlmRoutes, feeds: Arc<dyn FeedSource>, config: ApiConfig) -> Self {
    Self {
      store,
      llm: Arc::new(llm),
      feeds,
      identities: Arc::new(TtlCache::new(config.identity_ttl)),
      research: Arc::new(TtlCache::new(config.research_ttl)),
      config: Arc::new(config),
    }
  }

  /// Persona and knowledge for `id`, served from the identity cache when fresh.
  pub async fn identity(&self, id: &str) -> Result<Identity, ApiError> {
    if let Some(hit) = self.identities.get(&id.to_owned()) {
      return Ok(hit);
    }
    let persona = self
      .store
      .get_persona(id)
      .await
      .map_err(ApiError::store)?
      .ok_or_else(|| ApiError::NotFound(format!("persona {id}")))?;
    let knowledge = self.store.list_knowledge(id).await.map_err(ApiError::store)?;
    let identity = Identity { persona, knowledge };
    self.identities.insert(id.to_owned(), identity.clone());
    Ok(identity)
  }

  pub(crate) fn forget_identity(&self, id: &str) { self.identities.invalidate(&id.to_owned()); }
}

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: PolichatStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    // Chat
    .route("/chat", post(chat::handler::<S>))
    // Debate
    .route("/debate", post(debate::turn::<S>))
    .route("/debate/judge", post(debate::judge::<S>))
    .route("/debate/moderator", post(debate::moderator::<S>))
    .route("/debate/cache", get(cache::get_one::<S>).post(cache::create::<S>))
    // Issues
    .route("/issues/today", get(issues::today::<S>))
    .route("/issues/history", get(issues::history::<S>))
    .route("/issues/research", post(issues::research::<S>))
    .route("/issues/warmup", post(issues::warmup::<S>))
    .route("/issues/backfill", post(issues::backfill::<S>))
    .route("/issues/{date}", get(issues::by_date::<S>))
    // Personas
    .route("/personas", get(personas::list::<S>))
    .route(
      "/personas/{id}",
      get(personas::get_one::<S>).put(personas::upsert::<S>).delete(personas::delete_one::<S>),
    )
    .route("/personas/{id}/knowledge", get(personas::list_knowledge::<S>))
    .route(
      "/personas/{id}/knowledge/{name}",
      put(personas::put_knowledge::<S>).delete(personas::delete_knowledge::<S>),
    )
    // Memory
    .route("/memory/{user_id}/{persona_id}", get(memory::get_one::<S>))
    .route("/memory/{user_id}/{persona_id}/facts", post(memory::add_fact::<S>))
    .route("/history/{user_id}/{persona_id}", get(memory::history::<S>))
    .with_state(state)
}

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }
