//! `polichat`: terminal client for the Polichat server.
//!
//! # Usage
//!
//! ```
//! polichat debate --a kim-minjun --b lee-seoyeon --topic "부동산 정책" --style heated
//! polichat debate --a kim-minjun --b lee-seoyeon --free --topics 예산,연금,저출생
//! polichat chat --persona kim-minjun --user alice
//! ```

mod chat;
mod client;
mod debate;

use std::{io, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use client::ApiClient;
use crossterm::style::Stylize;
use debate::{Debate, DebateSetup, Pace, Speaker};
use polichat_core::{
  debate::{DebateKey, DebateStyle, DebateType, MessageKind, NewTranscript, TopicRotation},
  typing::TypingSpeed,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "polichat", about = "Debates and chats with politician personas")]
struct Args {
  /// Path to a TOML config file (url, user).
  #[arg(short, long, value_name = "FILE", global = true)]
  config: Option<PathBuf>,

  /// Base URL of the polichat server (default: http://127.0.0.1:8787).
  #[arg(long, env = "POLICHAT_URL", global = true)]
  url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a live debate between two personas.
  Debate(DebateArgs),
  /// Chat one-on-one with a persona.
  Chat(ChatArgs),
}

#[derive(clap::Args, Debug)]
struct DebateArgs {
  /// Persona id of the first speaker.
  #[arg(long)]
  a: String,

  /// Persona id of the second speaker.
  #[arg(long)]
  b: String,

  /// Debate topic; in free mode the first topic when `--topics` is absent.
  #[arg(long)]
  topic: Option<String>,

  #[arg(long, default_value = "calm")]
  style: DebateStyle,

  /// Number of speaker turns.
  #[arg(long, default_value_t = 10)]
  turns: usize,

  /// Free debate: rotate through `--topics` on a fixed cadence.
  #[arg(long)]
  free: bool,

  #[arg(long, value_delimiter = ',')]
  topics: Vec<String>,

  #[arg(long, default_value_t = 120)]
  rotate_secs: u64,

  /// Typing speed: slow, normal or fast.
  #[arg(long, default_value = "normal")]
  speed: TypingSpeed,

  /// Print bubbles without a typing pause.
  #[arg(long)]
  no_typing: bool,

  /// Replay the latest cached transcript instead of debating live.
  #[arg(long)]
  cached: bool,

  /// Do not store the transcript afterwards.
  #[arg(long)]
  no_save: bool,
}

#[derive(clap::Args, Debug)]
struct ChatArgs {
  #[arg(long)]
  persona: String,

  /// User id for memory and intimacy; chats anonymously when absent.
  #[arg(long, env = "POLICHAT_USER")]
  user: Option<String>,

  #[arg(long, default_value = "normal")]
  speed: TypingSpeed,

  #[arg(long)]
  no_typing: bool,
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:  String,
  #[serde(default)]
  user: String,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flags override config file, which overrides defaults.
  let base_url = args
    .url
    .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
    .unwrap_or_else(|| "http://127.0.0.1:8787".to_string());
  let client = ApiClient::new(&base_url)?;

  let cancel = CancellationToken::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
      }
    }
  });

  match args.command {
    Command::Debate(debate_args) => run_debate(&client, debate_args, cancel).await,
    Command::Chat(chat_args) => {
      let user = chat_args.user.or_else(|| (!file_cfg.user.is_empty()).then_some(file_cfg.user));
      let persona = client.persona(&chat_args.persona).await?;
      let pace: Pace = (!chat_args.no_typing).then_some(chat_args.speed);
      let session = chat::ChatSession::new(&chat_args.persona, user);
      chat::run(&client, &persona, session, pace, io::stdout(), cancel).await
    }
  }
}

async fn speaker(client: &ApiClient, id: &str) -> Result<Speaker> {
  let persona = client.persona(id).await.with_context(|| format!("loading persona {id}"))?;
  Ok(Speaker { id: persona.id, name: persona.name })
}

async fn run_debate(client: &ApiClient, args: DebateArgs, cancel: CancellationToken) -> Result<()> {
  if args.a == args.b {
    bail!("a debate needs two different personas");
  }

  let mut topics: Vec<String> = args.topics.iter().map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()).collect();
  if topics.is_empty()
    && let Some(topic) = &args.topic
  {
    topics.push(topic.trim().to_owned());
  }
  let Some(first) = topics.first().cloned() else {
    bail!("give a --topic (or --topics in free mode)");
  };

  let (debate_type, rotation) = if args.free {
    (DebateType::Free, TopicRotation::new(topics, Duration::from_secs(args.rotate_secs)))
  } else {
    (DebateType::Topic, None)
  };
  let key = DebateKey::new(&first, args.style, debate_type);
  let setup = DebateSetup {
    a: speaker(client, &args.a).await?,
    b: speaker(client, &args.b).await?,
    topic: key.topic.clone(),
    style: args.style,
    turns: args.turns,
    rotation,
  };
  let pace: Pace = (!args.no_typing).then_some(args.speed);
  let mut out = io::stdout();

  if args.cached {
    match client.cached_transcript(&key).await? {
      Some(transcript) => return debate::replay(&mut out, &transcript, &setup, pace).await,
      None => println!("{}", "저장된 토론이 없어 새로 시작합니다.".dim()),
    }
  }

  let outcome = Debate::new(client, &setup, pace, io::stdout(), cancel).run().await?;
  if outcome.cancelled || !outcome.messages.iter().any(|m| m.kind == MessageKind::Turn) {
    return Ok(());
  }

  let judgment = debate::judge(client, &setup, &outcome, &mut out).await?;
  if args.no_save {
    return Ok(());
  }
  let transcript = NewTranscript { key, messages: outcome.messages, judgment: Some(judgment) };
  match client.save_transcript(&transcript).await {
    Ok(saved) => println!("{}", format!("토론이 저장되었습니다 (v{}).", saved.version).dim()),
    Err(e) => warn!(error = %e, "failed to save transcript"),
  }
  Ok(())
}
