//! AI-vs-AI debate: transcript types, prompt construction and parsing of the
//! judge's verdict.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{issue::TopicBrief, persona::Persona};

/// A failed turn is retried this many times before a placeholder is used.
pub const MAX_TURN_ATTEMPTS: u32 = 3;

/// Bound on insert attempts when two writers race for the same version.
pub const MAX_VERSION_ATTEMPTS: u32 = 3;

/// Number of previous messages quoted back to the model.
pub const HISTORY_WINDOW: usize = 12;

pub const PLACEHOLDER_TEXT: &str = "(잠시 말을 고르고 있습니다…)";
pub const MODERATOR_ID: &str = "moderator";
pub const MODERATOR_NAME: &str = "사회자";
pub const MODERATOR_FALLBACK: &str =
  "잠시 정리하겠습니다. 두 분 모두 핵심 쟁점에 집중해 주시기 바랍니다.";

// ─── Keys ────────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
  AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DebateStyle {
  #[default]
  Calm,
  Heated,
  Comedic,
}

impl DebateStyle {
  fn instruction(self) -> &'static str {
    match self {
      DebateStyle::Calm => "차분하고 논리적으로, 근거를 들어 말하세요.",
      DebateStyle::Heated => {
        "날카롭고 공격적으로 상대의 약점을 파고드세요. 단, 욕설이나 인신공격은 금지입니다."
      }
      DebateStyle::Comedic => "유머와 풍자를 섞어 재치 있게 받아치세요.",
    }
  }
}

/// `Topic` debates stay on one topic; `Free` debates rotate topics on a
/// fixed cadence.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
  AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DebateType {
  #[default]
  Topic,
  Free,
}

/// Identity of a cached debate; one row per (key, version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebateKey {
  pub topic:       String,
  pub style:       DebateStyle,
  pub debate_type: DebateType,
}

impl DebateKey {
  pub fn new(topic: &str, style: DebateStyle, debate_type: DebateType) -> Self {
    Self { topic: normalize_topic(topic), style, debate_type }
  }
}

/// Trim and collapse whitespace so cache lookups are stable.
pub fn normalize_topic(topic: &str) -> String {
  topic.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─── Transcript ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
  #[default]
  Turn,
  Moderator,
  /// Stand-in for a turn whose generation failed on every attempt.
  Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateMessage {
  /// Persona id, or [`MODERATOR_ID`].
  pub speaker: String,
  pub text:    String,
  #[serde(default)]
  pub kind:    MessageKind,
}

impl DebateMessage {
  pub fn turn(speaker: &str, text: impl Into<String>) -> Self {
    Self { speaker: speaker.to_owned(), text: text.into(), kind: MessageKind::Turn }
  }

  pub fn moderator(text: impl Into<String>) -> Self {
    Self { speaker: MODERATOR_ID.to_owned(), text: text.into(), kind: MessageKind::Moderator }
  }

  pub fn placeholder(speaker: &str) -> Self {
    Self {
      speaker: speaker.to_owned(),
      text:    PLACEHOLDER_TEXT.to_owned(),
      kind:    MessageKind::Placeholder,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
  /// Winning persona id; `None` is a draw.
  pub winner:  Option<String>,
  #[serde(default)]
  pub scores:  BTreeMap<String, u8>,
  pub summary: String,
}

impl Default for Judgment {
  fn default() -> Self {
    Self {
      winner:  None,
      scores:  BTreeMap::new(),
      summary: "두 후보 모두 팽팽한 토론을 펼쳤습니다. 이번 토론은 무승부입니다.".to_owned(),
    }
  }
}

/// A stored debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
  pub key:        DebateKey,
  pub version:    u32,
  pub messages:   Vec<DebateMessage>,
  pub judgment:   Option<Judgment>,
  pub created_at: DateTime<Utc>,
}

/// Input for caching a debate; the version is assigned by the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTranscript {
  pub key:      DebateKey,
  pub messages: Vec<DebateMessage>,
  #[serde(default)]
  pub judgment: Option<Judgment>,
}

/// Result of inserting a transcript at an explicit version.
#[derive(Debug, Clone)]
pub enum VersionedInsert {
  Inserted(Transcript),
  /// Another writer already holds this (key, version).
  Conflict,
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

/// A system + user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
  pub system: String,
  pub user:   String,
}

fn speaker_name<'a>(id: &str, a: &'a Persona, b: &'a Persona) -> &'a str {
  if id == a.id {
    &a.name
  } else if id == b.id {
    &b.name
  } else {
    MODERATOR_NAME
  }
}

fn render_history(history: &[DebateMessage], a: &Persona, b: &Persona) -> String {
  let start = history.len().saturating_sub(HISTORY_WINDOW);
  history[start..]
    .iter()
    .filter(|m| m.kind != MessageKind::Placeholder)
    .map(|m| format!("{}: {}", speaker_name(&m.speaker, a, b), m.text))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Everything needed to generate one debate turn.
pub struct TurnContext<'a> {
  pub topic:    &'a str,
  pub style:    DebateStyle,
  pub speaker:  &'a Persona,
  pub opponent: &'a Persona,
  pub history:  &'a [DebateMessage],
  pub brief:    Option<&'a TopicBrief>,
}

impl TurnContext<'_> {
  pub fn prompt(&self) -> Prompt {
    let s = self.speaker;
    let mut system = format!(
      "당신은 TV 정치 토론에 출연한 {}입니다. 상대는 {}입니다.\n\
       주제: {}\n{}\n\
       한 번에 2~4문장으로만 말하고, 이름표나 따옴표 없이 발언 내용만 출력하세요.\n",
      s.display_name(),
      self.opponent.display_name(),
      self.topic,
      self.style.instruction(),
    );
    if let Some(tone) = &s.tone {
      system.push_str(&format!("말투: {tone}\n"));
    }
    if !s.stance.is_empty() {
      system.push_str(&format!("\n# 기본 입장\n{}\n", s.stance));
    }
    if let Some(brief) = self.brief.filter(|b| !b.points.is_empty()) {
      system.push_str("\n# 준비한 논점\n");
      for p in &brief.points {
        system.push_str(&format!("- {p}\n"));
      }
    }

    let user = if self.history.is_empty() {
      format!("토론을 시작합니다. {}의 첫 발언을 해 주세요.", s.name)
    } else {
      format!(
        "지금까지의 토론:\n{}\n\n{}의 다음 발언을 해 주세요.",
        render_history(self.history, self.speaker, self.opponent),
        s.name
      )
    };

    Prompt { system, user }
  }
}

pub fn judge_prompt(topic: &str, a: &Persona, b: &Persona, messages: &[DebateMessage]) -> Prompt {
  let system = format!(
    "당신은 공정한 토론 심사위원입니다. 주제 \"{topic}\"에 대한 {}와 {}의 토론을 평가하세요.\n\
     논리, 근거, 전달력을 기준으로 각자 0~100점을 매기고, 아래 JSON 형식으로만 답하세요.\n\
     {{\"winner\": \"{}\" | \"{}\" | null, \"scores\": {{\"{}\": 점수, \"{}\": 점수}}, \"summary\": \"두세 문장 총평\"}}",
    a.name, b.name, a.id, b.id, a.id, b.id,
  );
  let user = format!("토론 기록:\n{}", render_all(messages, a, b));
  Prompt { system, user }
}

fn render_all(messages: &[DebateMessage], a: &Persona, b: &Persona) -> String {
  messages
    .iter()
    .filter(|m| m.kind != MessageKind::Placeholder)
    .map(|m| format!("{}: {}", speaker_name(&m.speaker, a, b), m.text))
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn moderator_prompt(
  topic: &str,
  a: &Persona,
  b: &Persona,
  messages: &[DebateMessage],
  next_topic: Option<&str>,
) -> Prompt {
  let mut system = format!(
    "당신은 정치 토론 프로그램의 사회자입니다. 현재 주제는 \"{topic}\"이고 토론자는 {}와 {}입니다.\n\
     중립을 지키며 한두 문장으로 짧게 개입하세요.\n",
    a.name, b.name
  );
  match next_topic {
    Some(next) => system.push_str(&format!(
      "지금까지의 논의를 한 문장으로 정리한 뒤 다음 주제 \"{next}\"로 넘어간다고 알리세요.\n"
    )),
    None => system.push_str("과열되었다면 진정시키고, 논점이 흐려졌다면 핵심 쟁점을 다시 짚어 주세요.\n"),
  }
  let start = messages.len().saturating_sub(HISTORY_WINDOW);
  let user = format!("최근 발언:\n{}", render_all(&messages[start..], a, b));
  Prompt { system, user }
}

/// Fallback line when the moderator model is unavailable.
pub fn moderator_fallback(next_topic: Option<&str>) -> String {
  match next_topic {
    Some(next) => format!("좋습니다. 다음 주제로 넘어가겠습니다. 이번 주제는 \"{next}\"입니다."),
    None => MODERATOR_FALLBACK.to_owned(),
  }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Slice from the first `{` to the last `}` of `text`.
pub fn extract_json_object(text: &str) -> Option<&str> {
  let start = text.find('{')?;
  let end = text.rfind('}')?;
  (end > start).then(|| &text[start..=end])
}

#[derive(Deserialize)]
struct RawJudgment {
  winner:  Option<serde_json::Value>,
  #[serde(default)]
  scores:  BTreeMap<String, serde_json::Value>,
  #[serde(default)]
  summary: String,
}

/// Interpret a judge model's answer. Anything unusable falls back to
/// [`Judgment::default`].
pub fn parse_judgment(text: &str, speakers: &[&str]) -> Judgment {
  let Some(raw) = extract_json_object(text)
    .and_then(|json| serde_json::from_str::<RawJudgment>(json).ok())
  else {
    return Judgment::default();
  };

  let winner = raw
    .winner
    .and_then(|v| v.as_str().map(str::to_owned))
    .filter(|w| speakers.contains(&w.as_str()));

  let scores = raw
    .scores
    .into_iter()
    .filter(|(k, _)| speakers.contains(&k.as_str()))
    .filter_map(|(k, v)| v.as_f64().map(|s| (k, s.clamp(0.0, 100.0).round() as u8)))
    .collect();

  let summary = if raw.summary.trim().is_empty() {
    Judgment::default().summary
  } else {
    raw.summary.trim().to_owned()
  };

  Judgment { winner, scores, summary }
}

/// Strip labels and markup a model tends to add around a debate turn.
pub fn clean_turn_text(text: &str, speaker_name: &str) -> String {
  let mut t = text.trim().replace("**", "").replace("__", "");

  for prefix in [
    format!("{speaker_name}:"),
    format!("{speaker_name} :"),
    format!("[{speaker_name}]"),
    format!("{speaker_name}："),
  ] {
    if let Some(rest) = t.strip_prefix(prefix.as_str()) {
      t = rest.trim_start().to_owned();
      break;
    }
  }

  let quotes: &[char] = &['"', '“', '”', '\''];
  let trimmed = t.trim();
  if trimmed.len() > 1
    && trimmed.starts_with(quotes)
    && trimmed.ends_with(quotes)
  {
    return trimmed.trim_matches(quotes).trim().to_owned();
  }
  trimmed.to_owned()
}

// ─── Free-debate topic rotation ──────────────────────────────────────────────

/// Topics for a free debate, switched every `interval` of wall-clock time.
#[derive(Debug, Clone)]
pub struct TopicRotation {
  topics:   Vec<String>,
  interval: Duration,
}

impl TopicRotation {
  /// `None` when there are no topics or the interval is zero.
  pub fn new(topics: Vec<String>, interval: Duration) -> Option<Self> {
    (!topics.is_empty() && !interval.is_zero()).then_some(Self { topics, interval })
  }

  pub fn index_at(&self, elapsed: Duration) -> usize {
    let n = (elapsed.as_nanos() / self.interval.as_nanos()) as usize;
    n % self.topics.len()
  }

  pub fn topic_at(&self, elapsed: Duration) -> &str { &self.topics[self.index_at(elapsed)] }
}
