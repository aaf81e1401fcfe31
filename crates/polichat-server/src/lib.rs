//! Configuration and startup helpers for the Polichat server binary.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use chrono::Utc;
use polichat_api::ApiConfig;
use polichat_core::{
  persona::{KnowledgeFile, Persona},
  store::PolichatStore,
};
use polichat_llm::{ModelChoice, ProviderKeys, RetryPolicy, Role};
use serde::Deserialize;
use tracing::{info, warn};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and the
/// environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:              String,
  pub port:              u16,
  pub store_path:        PathBuf,
  /// Static persona files seeded into an empty store.
  pub personas_dir:      Option<PathBuf>,
  /// RSS feeds used for issue research.
  pub feeds:             Vec<String>,
  pub warmup_secret:     Option<String>,
  pub keys:              ProviderKeys,
  pub models:            BTreeMap<Role, ModelChoice>,
  /// Retries per LLM request on 429/5xx and transport errors.
  pub max_retries:       u32,
  pub identity_ttl_secs: u64,
  pub research_ttl_secs: u64,
  pub chat_xp:           u32,
  /// Accepted for compatibility with hosted deployments; unused.
  pub supabase_url:      Option<String>,
  pub supabase_anon_key: Option<String>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:              "127.0.0.1".into(),
      port:              8787,
      store_path:        PathBuf::from("~/.local/share/polichat/polichat.db"),
      personas_dir:      None,
      feeds:             vec![
        "https://www.yna.co.kr/rss/politics.xml".into(),
        "https://www.hani.co.kr/rss/politics/".into(),
      ],
      warmup_secret:     None,
      keys:              ProviderKeys::default(),
      models:            BTreeMap::new(),
      max_retries:       3,
      identity_ttl_secs: 600,
      research_ttl_secs: 1800,
      chat_xp:           10,
      supabase_url:      None,
      supabase_anon_key: None,
    }
  }
}

impl ServerConfig {
  /// Layer `file` (optional), `POLICHAT_*` variables and the bare provider
  /// variables, in increasing priority.
  pub fn load(file: &Path) -> anyhow::Result<Self> {
    let bare = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    let settings = config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(config::Environment::with_prefix("POLICHAT").separator("__"))
      .set_override_option("keys.anthropic", bare("ANTHROPIC_API_KEY"))?
      .set_override_option("keys.openai", bare("OPENAI_API_KEY"))?
      .set_override_option("keys.openrouter", bare("OPENROUTER_API_KEY"))?
      .set_override_option("warmup_secret", bare("WARMUP_SECRET"))?
      .set_override_option("supabase_url", bare("SUPABASE_URL"))?
      .set_override_option("supabase_anon_key", bare("SUPABASE_ANON_KEY"))?
      .build()
      .context("failed to read configuration")?;

    settings.try_deserialize().context("failed to deserialise ServerConfig")
  }

  pub fn api_config(&self) -> ApiConfig {
    ApiConfig {
      warmup_secret: self.warmup_secret.clone().filter(|s| !s.trim().is_empty()),
      identity_ttl:  Duration::from_secs(self.identity_ttl_secs),
      research_ttl:  Duration::from_secs(self.research_ttl_secs),
      chat_xp:       self.chat_xp,
    }
  }

  pub fn retry_policy(&self) -> RetryPolicy { RetryPolicy { max_retries: self.max_retries, ..RetryPolicy::default() } }

  /// Warn about settings that are read but have no effect.
  pub fn warn_ignored(&self) {
    if self.supabase_url.is_some() || self.supabase_anon_key.is_some() {
      warn!("SUPABASE_URL / SUPABASE_ANON_KEY are ignored; data is kept in the local SQLite store");
    }
    if self.warmup_secret.is_none() {
      warn!("no warmup secret configured; /issues/warmup and /issues/backfill will refuse every request");
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Seeding ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SeedReport {
  pub seeded:   Vec<String>,
  pub existing: Vec<String>,
  pub invalid:  Vec<PathBuf>,
}

async fn markdown_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
  let mut entries = tokio::fs::read_dir(dir)
    .await
    .with_context(|| format!("failed to read {dir:?}"))?;
  let mut paths = Vec::new();
  while let Some(entry) = entries.next_entry().await? {
    let path = entry.path();
    if entry.file_type().await?.is_file() && path.extension().is_some_and(|e| e == "md") {
      paths.push(path);
    }
  }
  paths.sort();
  Ok(paths)
}

/// Load `<dir>/<id>.md` personas that the store does not know yet, with
/// knowledge files from `<dir>/<id>/*.md`. Personas already stored are left
/// untouched.
pub async fn seed_personas<S: PolichatStore>(store: &S, dir: &Path) -> anyhow::Result<SeedReport> {
  let mut report = SeedReport::default();

  for path in markdown_files(dir).await? {
    let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
      report.invalid.push(path);
      continue;
    };
    if store.get_persona(&id).await?.is_some() {
      report.existing.push(id);
      continue;
    }

    let text = tokio::fs::read_to_string(&path)
      .await
      .with_context(|| format!("failed to read {path:?}"))?;
    let persona = match Persona::from_markdown(&id, &text) {
      Ok(persona) => persona,
      Err(e) => {
        warn!(?path, error = %e, "skipping persona file");
        report.invalid.push(path);
        continue;
      }
    };
    store.upsert_persona(persona).await?;

    let knowledge_dir = dir.join(&id);
    if tokio::fs::metadata(&knowledge_dir).await.is_ok_and(|m| m.is_dir()) {
      for file in markdown_files(&knowledge_dir).await? {
        let Some(name) = file.file_name().and_then(|s| s.to_str()).map(str::to_owned) else {
          continue;
        };
        let content = tokio::fs::read_to_string(&file)
          .await
          .with_context(|| format!("failed to read {file:?}"))?;
        store
          .put_knowledge(KnowledgeFile { persona_id: id.clone(), name, content, updated_at: Utc::now() })
          .await?;
      }
    }

    info!(persona = %id, "seeded persona");
    report.seeded.push(id);
  }
  Ok(report)
}
