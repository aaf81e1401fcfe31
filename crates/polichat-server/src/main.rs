//! polichat-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus the
//! environment, opens the SQLite store, seeds static personas, and serves the
//! JSON/SSE API under `/api`.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use polichat_api::{AppState, HttpFeedSource, api_router};
use polichat_llm::LlmRoutes;
use polichat_server::{ServerConfig, expand_tilde, seed_personas};
use polichat_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Polichat API server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Directory of static persona files; overrides `personas_dir`.
  #[arg(long)]
  seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = ServerConfig::load(&cli.config)?;
  server_cfg.warn_ignored();

  // Open SQLite store.
  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  // Seed static personas.
  if let Some(dir) = cli.seed.or_else(|| server_cfg.personas_dir.clone()) {
    let dir = expand_tilde(&dir);
    let report = seed_personas(&store, &dir).await?;
    info!(
      seeded = report.seeded.len(),
      existing = report.existing.len(),
      invalid = report.invalid.len(),
      "personas loaded from {dir:?}"
    );
  }

  let llm = LlmRoutes::from_config(&server_cfg.keys, &server_cfg.models, server_cfg.retry_policy())
    .context("no usable LLM provider; set ANTHROPIC_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY")?;
  let feeds = HttpFeedSource::new(server_cfg.feeds.clone()).context("failed to build feed client")?;

  let state = AppState::new(Arc::new(store), llm, Arc::new(feeds), server_cfg.api_config());
  let app = Router::new()
    .nest("/api", api_router(state))
    .layer(TraceLayer::new_for_http());

  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  info!("server stopped");
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("shutting down"),
    Err(e) => {
      tracing::warn!(error = %e, "cannot listen for ctrl-c; running until killed");
      std::future::pending::<()>().await;
    }
  }
}
