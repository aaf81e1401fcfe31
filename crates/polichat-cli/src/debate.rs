//! Live AI-vs-AI debate in the terminal.
//!
//! Each turn streams from the server, is cut into bubbles as it arrives and
//! printed with a simulated typing pause. A turn that keeps failing is
//! recorded as a placeholder so the debate can go on. The moderator steps in
//! every few turns, and in free mode announces each topic change.

use std::{
  io::Write,
  time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use crossterm::{
  cursor::MoveToColumn,
  queue,
  style::{Print, Stylize},
  terminal::{Clear, ClearType},
};
use futures_util::StreamExt as _;
use polichat_core::{
  bubble::{BubbleSplitter, split_bubbles},
  debate::{
    DebateMessage, DebateStyle, Judgment, MAX_TURN_ATTEMPTS, MODERATOR_NAME, MessageKind,
    PLACEHOLDER_TEXT, TopicRotation, Transcript, clean_turn_text, moderator_fallback,
  },
  tension::{AudienceReaction, FactKind, MAX_TENSION, TensionGauge, TensionLevel, highlight_facts},
  typing::{TypingSpeed, typing_delay},
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{ApiClient, JudgeRequest, ModeratorRequest, ReplyStream, TurnRequest};

/// The moderator may interject before every `MODERATOR_EVERY`-th turn.
pub const MODERATOR_EVERY: usize = 4;
const GAUGE_WIDTH: usize = 20;

/// What the debate loop needs from the server.
#[async_trait]
pub trait DebateBackend: Send + Sync {
  async fn turn(&self, request: &TurnRequest) -> Result<ReplyStream>;
  async fn moderate(&self, request: &ModeratorRequest) -> Result<String>;
  async fn judge(&self, request: &JudgeRequest) -> Result<Judgment>;
}

#[async_trait]
impl DebateBackend for ApiClient {
  async fn turn(&self, request: &TurnRequest) -> Result<ReplyStream> { ApiClient::turn(self, request).await }

  async fn moderate(&self, request: &ModeratorRequest) -> Result<String> { self.moderator(request).await }

  async fn judge(&self, request: &JudgeRequest) -> Result<Judgment> { ApiClient::judge(self, request).await }
}

#[derive(Debug, Clone)]
pub struct Speaker {
  pub id:   String,
  pub name: String,
}

pub struct DebateSetup {
  pub a:        Speaker,
  pub b:        Speaker,
  pub topic:    String,
  pub style:    DebateStyle,
  pub turns:    usize,
  /// Free-debate topic rotation; `None` keeps `topic` throughout.
  pub rotation: Option<TopicRotation>,
}

/// Bubble pacing. `None` prints bubbles immediately.
pub type Pace = Option<TypingSpeed>;

pub struct DebateOutcome {
  pub messages:  Vec<DebateMessage>,
  /// Topic in effect when the debate ended.
  pub topic:     String,
  pub cancelled: bool,
}

pub struct Debate<'a, B, W> {
  backend:  &'a B,
  setup:    &'a DebateSetup,
  pace:     Pace,
  out:      W,
  cancel:   CancellationToken,
  messages: Vec<DebateMessage>,
  gauge:    TensionGauge,
}

impl<'a, B: DebateBackend, W: Write> Debate<'a, B, W> {
  pub fn new(backend: &'a B, setup: &'a DebateSetup, pace: Pace, out: W, cancel: CancellationToken) -> Self {
    Self { backend, setup, pace, out, cancel, messages: Vec::new(), gauge: TensionGauge::new() }
  }

  pub async fn run(mut self) -> Result<DebateOutcome> {
    let started = Instant::now();
    let mut topic = match &self.setup.rotation {
      Some(rotation) => rotation.topic_at(Duration::ZERO).to_owned(),
      None => self.setup.topic.clone(),
    };
    writeln!(
      self.out,
      "{} {} vs {} · {}",
      "▶".bold(),
      self.setup.a.name.as_str().cyan().bold(),
      self.setup.b.name.as_str().magenta().bold(),
      topic.clone().bold()
    )?;

    for i in 0..self.setup.turns {
      if self.cancel.is_cancelled() {
        break;
      }

      let next_topic = self
        .setup
        .rotation
        .as_ref()
        .map(|r| r.topic_at(started.elapsed()))
        .filter(|t| *t != topic)
        .map(str::to_owned);
      if let Some(next) = next_topic {
        self.interject(&topic, Some(&next)).await?;
        topic = next;
      } else if i > 0 && i % MODERATOR_EVERY == 0 {
        self.interject(&topic, None).await?;
      }

      let (speaker, opponent) = if i % 2 == 0 {
        (self.setup.a.clone(), self.setup.b.clone())
      } else {
        (self.setup.b.clone(), self.setup.a.clone())
      };
      let Some(message) = self.take_turn(&topic, &speaker, &opponent).await? else { break };
      if message.kind == MessageKind::Turn {
        self.show_tension(&message.text)?;
      }
      self.messages.push(message);
    }

    let cancelled = self.cancel.is_cancelled();
    if cancelled {
      writeln!(self.out, "\n{}", "토론이 중단되었습니다.".dim())?;
    }
    Ok(DebateOutcome { messages: self.messages, topic, cancelled })
  }

  /// One turn, retried up to [`MAX_TURN_ATTEMPTS`]. `None` when cancelled.
  async fn take_turn(
    &mut self,
    topic: &str,
    speaker: &Speaker,
    opponent: &Speaker,
  ) -> Result<Option<DebateMessage>> {
    let request = TurnRequest {
      topic:    topic.to_owned(),
      style:    self.setup.style,
      speaker:  speaker.id.clone(),
      opponent: opponent.id.clone(),
      history:  self.messages.clone(),
    };
    let cancel = self.cancel.clone();

    for attempt in 1..=MAX_TURN_ATTEMPTS {
      let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        result = self.stream_turn(&request, speaker) => result,
      };
      match result {
        Ok(text) => return Ok(Some(DebateMessage::turn(&speaker.id, text))),
        Err(e) => {
          warn!(speaker = %speaker.id, attempt, error = %e, "turn failed");
          writeln!(self.out, "{}", format!("  (연결이 불안정합니다… {attempt}/{MAX_TURN_ATTEMPTS})").dim())?;
        }
      }
    }

    writeln!(self.out, "{} {}", speaker_label(speaker, self.setup), PLACEHOLDER_TEXT.dim())?;
    Ok(Some(DebateMessage::placeholder(&speaker.id)))
  }

  async fn stream_turn(&mut self, request: &TurnRequest, speaker: &Speaker) -> Result<String> {
    let mut stream = self.backend.turn(request).await?;
    writeln!(self.out, "\n{}", speaker_label(speaker, self.setup))?;

    let mut splitter = BubbleSplitter::new();
    let mut full = String::new();
    let mut first = true;
    while let Some(delta) = stream.next().await {
      let delta = delta?;
      full.push_str(&delta);
      for bubble in splitter.push(&delta) {
        self.show_bubble(&bubble, &speaker.name, &mut first).await?;
      }
    }
    for bubble in splitter.finish() {
      self.show_bubble(&bubble, &speaker.name, &mut first).await?;
    }

    let text = clean_turn_text(&full, &speaker.name);
    if text.is_empty() {
      bail!("empty turn from {}", speaker.id);
    }
    Ok(text)
  }

  async fn show_bubble(&mut self, bubble: &str, name: &str, first: &mut bool) -> Result<()> {
    let bubble = if *first { clean_turn_text(bubble, name) } else { bubble.trim().to_owned() };
    *first = false;
    if bubble.is_empty() {
      return Ok(());
    }

    if let Some(speed) = self.pace {
      queue!(self.out, Print("  …".dim()))?;
      self.out.flush()?;
      tokio::time::sleep(typing_delay(&bubble, speed)).await;
      queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    }
    write!(self.out, "  ")?;
    write_highlighted(&mut self.out, &bubble)?;
    writeln!(self.out)?;
    self.out.flush()?;
    Ok(())
  }

  async fn interject(&mut self, topic: &str, next_topic: Option<&str>) -> Result<()> {
    let request = ModeratorRequest {
      topic:      topic.to_owned(),
      a:          self.setup.a.id.clone(),
      b:          self.setup.b.id.clone(),
      messages:   self.messages.clone(),
      next_topic: next_topic.map(str::to_owned),
    };
    let cancel = self.cancel.clone();
    let text = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Ok(()),
      result = self.backend.moderate(&request) => result.unwrap_or_else(|e| {
        warn!(error = %e, "moderator unavailable");
        moderator_fallback(next_topic)
      }),
    };

    writeln!(self.out, "\n{}", format!("🎤 {MODERATOR_NAME}").yellow().bold())?;
    for bubble in split_bubbles(&text) {
      writeln!(self.out, "  {}", bubble.yellow())?;
    }
    self.messages.push(DebateMessage::moderator(text));
    Ok(())
  }

  fn show_tension(&mut self, text: &str) -> Result<()> {
    let score = self.gauge.observe(text);
    let level = self.gauge.level();
    let filled = (((score / MAX_TENSION) * GAUGE_WIDTH as f32).round() as usize).min(GAUGE_WIDTH);
    let bar = format!("{}{}", "■".repeat(filled), "□".repeat(GAUGE_WIDTH - filled));
    let bar = match level {
      TensionLevel::Calm => bar.green(),
      TensionLevel::Warm => bar.yellow(),
      TensionLevel::Hot => bar.red(),
      TensionLevel::Boiling => bar.red().bold(),
    };
    writeln!(
      self.out,
      "  {} {bar} {:>3.0}  {}",
      "긴장도".dim(),
      score,
      AudienceReaction::for_level(level).caption().dim()
    )?;
    Ok(())
  }
}

/// Ask for a verdict and print it; failures fall back to a draw.
pub async fn judge<B: DebateBackend>(
  backend: &B,
  setup: &DebateSetup,
  outcome: &DebateOutcome,
  out: &mut impl Write,
) -> Result<Judgment> {
  let request = JudgeRequest {
    topic:    outcome.topic.clone(),
    a:        setup.a.id.clone(),
    b:        setup.b.id.clone(),
    messages: outcome.messages.clone(),
  };
  let judgment = backend.judge(&request).await.unwrap_or_else(|e| {
    warn!(error = %e, "judge unavailable");
    Judgment::default()
  });
  write_judgment(out, &judgment, setup)?;
  Ok(judgment)
}

fn speaker_label(speaker: &Speaker, setup: &DebateSetup) -> String {
  let label = format!("【{}】", speaker.name);
  if speaker.id == setup.a.id { label.cyan().bold().to_string() } else { label.magenta().bold().to_string() }
}

/// Print `text` with factual-looking spans emphasised.
pub fn write_highlighted(out: &mut impl Write, text: &str) -> Result<()> {
  let mut cursor = 0;
  for span in highlight_facts(text) {
    write!(out, "{}", &text[cursor..span.range.start])?;
    let fact = &text[span.range.clone()];
    match span.kind {
      FactKind::Figure | FactKind::Year => write!(out, "{}", fact.bold().underlined())?,
      FactKind::Sourced => write!(out, "{}", fact.underlined())?,
    }
    cursor = span.range.end;
  }
  write!(out, "{}", &text[cursor..])?;
  Ok(())
}

fn write_judgment(out: &mut impl Write, judgment: &Judgment, setup: &DebateSetup) -> Result<()> {
  let name_of = |id: &str| {
    [&setup.a, &setup.b].into_iter().find(|s| s.id == id).map_or_else(|| id.to_owned(), |s| s.name.clone())
  };
  writeln!(out, "\n{}", "⚖ 심사 결과".bold())?;
  match &judgment.winner {
    Some(winner) => writeln!(out, "  승자: {}", name_of(winner).green().bold())?,
    None => writeln!(out, "  {}", "무승부".bold())?,
  }
  for (id, score) in &judgment.scores {
    writeln!(out, "  {}: {score}점", name_of(id))?;
  }
  writeln!(out, "  {}", judgment.summary)?;
  Ok(())
}

/// Print a stored debate, paced like a live one.
pub async fn replay(out: &mut impl Write, transcript: &Transcript, setup: &DebateSetup, pace: Pace) -> Result<()> {
  writeln!(
    out,
    "{} {} (v{})",
    "⏵ 저장된 토론".bold(),
    transcript.key.topic.clone().bold(),
    transcript.version
  )?;
  for message in &transcript.messages {
    let label = match message.kind {
      MessageKind::Moderator => format!("🎤 {MODERATOR_NAME}").yellow().bold().to_string(),
      _ => {
        let speaker = [&setup.a, &setup.b]
          .into_iter()
          .find(|s| s.id == message.speaker)
          .cloned()
          .unwrap_or_else(|| Speaker { id: message.speaker.clone(), name: message.speaker.clone() });
        speaker_label(&speaker, setup)
      }
    };
    writeln!(out, "\n{label}")?;
    for bubble in split_bubbles(&message.text) {
      if let Some(speed) = pace {
        tokio::time::sleep(typing_delay(&bubble, speed)).await;
      }
      write!(out, "  ")?;
      write_highlighted(out, &bubble)?;
      writeln!(out)?;
      out.flush()?;
    }
  }
  if let Some(judgment) = &transcript.judgment {
    write_judgment(out, judgment, setup)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
  };

  use anyhow::anyhow;

  use super::*;

  /// Speaks fixed lines, except for `broken` which never gets a turn out.
  #[derive(Default)]
  struct Scripted {
    broken:          Option<&'static str>,
    turn_delay:      Duration,
    turn_calls:      Mutex<Vec<String>>,
    turn_topics:     Mutex<Vec<String>>,
    moderator_calls: AtomicU32,
    judged_topic:    Mutex<Option<String>>,
  }

  #[async_trait]
  impl DebateBackend for Scripted {
    async fn turn(&self, request: &TurnRequest) -> Result<ReplyStream> {
      tokio::time::sleep(self.turn_delay).await;
      self.turn_calls.lock().unwrap().push(request.speaker.clone());
      self.turn_topics.lock().unwrap().push(request.topic.clone());
      if self.broken == Some(request.speaker.as_str()) {
        return Err(anyhow!("503 from upstream"));
      }
      let chunks = vec![Ok("저는 2024년 예산 ".to_owned()), Ok("3조 원 증액에 찬성합니다.".to_owned())];
      Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn moderate(&self, _: &ModeratorRequest) -> Result<String> {
      self.moderator_calls.fetch_add(1, Ordering::SeqCst);
      Err(anyhow!("moderator offline"))
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<Judgment> {
      *self.judged_topic.lock().unwrap() = Some(request.topic.clone());
      Ok(Judgment { winner: Some("kim".into()), ..Judgment::default() })
    }
  }

  fn setup(turns: usize) -> DebateSetup {
    DebateSetup {
      a: Speaker { id: "kim".into(), name: "김민준".into() },
      b: Speaker { id: "lee".into(), name: "이서연".into() },
      topic: "예산안".into(),
      style: DebateStyle::Calm,
      turns,
      rotation: None,
    }
  }

  #[tokio::test]
  async fn failing_speaker_gets_placeholder_after_retries() {
    let backend = Scripted { broken: Some("lee"), ..Default::default() };
    let outcome = Debate::new(&backend, &setup(2), None, Vec::new(), CancellationToken::new())
      .run()
      .await
      .unwrap();

    assert_eq!(outcome.messages.len(), 2);
    assert_eq!(outcome.messages[0].text, "저는 2024년 예산 3조 원 증액에 찬성합니다.");
    assert_eq!(outcome.messages[1].kind, MessageKind::Placeholder);
    let lee_calls = backend.turn_calls.lock().unwrap().iter().filter(|s| *s == "lee").count();
    assert_eq!(lee_calls, MAX_TURN_ATTEMPTS as usize);
  }

  #[tokio::test]
  async fn moderator_interjects_every_fourth_turn_with_fallback() {
    let backend = Scripted::default();
    let outcome = Debate::new(&backend, &setup(9), None, Vec::new(), CancellationToken::new())
      .run()
      .await
      .unwrap();

    let kinds: Vec<MessageKind> = outcome.messages.iter().map(|m| m.kind).collect();
    assert_eq!(kinds.len(), 11);
    assert_eq!(kinds[4], MessageKind::Moderator);
    assert_eq!(kinds[9], MessageKind::Moderator);
    assert_eq!(backend.moderator_calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.messages[4].text, moderator_fallback(None));
  }

  #[tokio::test]
  async fn cancelled_debate_stops_before_next_turn() {
    let backend = Scripted::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = Debate::new(&backend, &setup(4), None, Vec::new(), cancel).run().await.unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.messages.is_empty());
    assert!(backend.turn_calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn judge_prints_winner_name() {
    let backend = Scripted::default();
    let outcome = DebateOutcome { messages: vec![], topic: "예산안".into(), cancelled: false };
    let mut out = Vec::new();
    let judgment = judge(&backend, &setup(2), &outcome, &mut out).await.unwrap();
    assert_eq!(judgment.winner.as_deref(), Some("kim"));
    assert!(String::from_utf8(out).unwrap().contains("김민준"));
  }

  #[tokio::test(start_paused = true)]
  async fn free_debate_is_judged_on_the_last_topic() {
    let backend = Scripted { turn_delay: Duration::from_secs(60), ..Default::default() };
    let topics = vec!["예산".to_owned(), "연금".to_owned(), "저출생".to_owned()];
    let setup = DebateSetup {
      rotation: TopicRotation::new(topics, Duration::from_secs(60)),
      ..setup(3)
    };

    let outcome =
      Debate::new(&backend, &setup, None, Vec::new(), CancellationToken::new()).run().await.unwrap();
    assert_eq!(*backend.turn_topics.lock().unwrap(), ["예산", "연금", "저출생"]);
    assert_eq!(outcome.topic, "저출생");

    judge(&backend, &setup, &outcome, &mut Vec::new()).await.unwrap();
    assert_eq!(backend.judged_topic.lock().unwrap().as_deref(), Some("저출생"));
  }

  #[test]
  fn highlights_keep_all_text() {
    let mut out = Vec::new();
    write_highlighted(&mut out, "통계청 발표에 따르면 실업률은 3.2%입니다").unwrap();
    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("입니다"));
    assert!(printed.contains('\u{1b}'));
  }
}
