//! Debate atmosphere: the tension gauge and "fact" highlighting.
//!
//! Both are keyword heuristics over turn text. They drive cosmetic effects
//! (gauge colour, audience reactions, underlined claims) and carry no
//! judgement about who is right.

use std::{ops::Range, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MAX_TENSION: f32 = 100.0;

const DECAY: f32 = 0.85;
const KEYWORD_WEIGHT: f32 = 12.0;
const EXCLAMATION_WEIGHT: f32 = 4.0;

const HEATED_KEYWORDS: &[&str] = &[
  "거짓말", "말도 안", "책임", "사과", "사퇴", "위선", "무능", "내로남불", "부끄", "한심",
  "선동", "궤변", "망언", "똑바로", "국민을 속",
];

// ─── Tension gauge ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensionLevel {
  Calm,
  Warm,
  Hot,
  Boiling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TensionGauge {
  pub score: f32,
}

/// Number of heated keyword occurrences in `text`.
pub fn heated_hits(text: &str) -> usize {
  HEATED_KEYWORDS.iter().map(|k| text.matches(k).count()).sum()
}

impl TensionGauge {
  pub fn new() -> Self { Self::default() }

  /// Fold one turn into the gauge and return the new score.
  pub fn observe(&mut self, text: &str) -> f32 {
    let hits = heated_hits(text) as f32;
    let bangs = text.chars().filter(|&c| c == '!' || c == '！').count() as f32;
    self.score = (self.score * DECAY + hits * KEYWORD_WEIGHT + bangs * EXCLAMATION_WEIGHT)
      .clamp(0.0, MAX_TENSION);
    self.score
  }

  pub fn level(&self) -> TensionLevel {
    match self.score {
      s if s >= 75.0 => TensionLevel::Boiling,
      s if s >= 50.0 => TensionLevel::Hot,
      s if s >= 25.0 => TensionLevel::Warm,
      _ => TensionLevel::Calm,
    }
  }
}

/// Cosmetic audience reaction shown after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceReaction {
  Nodding,
  Murmur,
  Gasp,
  Uproar,
}

impl AudienceReaction {
  pub fn for_level(level: TensionLevel) -> Self {
    match level {
      TensionLevel::Calm => Self::Nodding,
      TensionLevel::Warm => Self::Murmur,
      TensionLevel::Hot => Self::Gasp,
      TensionLevel::Boiling => Self::Uproar,
    }
  }

  pub fn caption(self) -> &'static str {
    match self {
      Self::Nodding => "(방청객들이 고개를 끄덕인다)",
      Self::Murmur => "(객석이 웅성거린다)",
      Self::Gasp => "(객석에서 탄성이 터진다)",
      Self::Uproar => "(장내가 술렁인다!)",
    }
  }
}

// ─── Fact highlighting ───────────────────────────────────────────────────────

/// Why a span was highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
  Figure,
  Year,
  Sourced,
}

/// Byte range in the turn text that looks like a factual claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSpan {
  pub range: Range<usize>,
  pub kind:  FactKind,
}

static FIGURE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\d[\d,]*(?:\.\d+)?\s*(?:%|퍼센트|조\s*원|억\s*원|만\s*명|조|억|만|원|명|배)")
    .expect("figure regex")
});

static YEAR: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?:19|20)\d{2}\s*년").expect("year regex"));

static SENTENCE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[^.!?…\n]+[.!?…]?").expect("sentence regex"));

const SOURCE_MARKERS: &[&str] = &["통계", "조사", "에 따르면", "발표", "보고서", "자료"];

/// Find claims worth highlighting. Sourced sentences win over the figures
/// they contain; the result is sorted and non-overlapping.
pub fn highlight_facts(text: &str) -> Vec<FactSpan> {
  let mut spans: Vec<FactSpan> = Vec::new();

  for m in SENTENCE.find_iter(text) {
    if SOURCE_MARKERS.iter().any(|k| m.as_str().contains(k)) {
      let lead = m.as_str().len() - m.as_str().trim_start().len();
      let trail = m.as_str().len() - m.as_str().trim_end().len();
      spans.push(FactSpan {
        range: m.start() + lead..m.end() - trail,
        kind:  FactKind::Sourced,
      });
    }
  }

  let covered = |r: &Range<usize>, spans: &[FactSpan]| {
    spans.iter().any(|s| s.range.start < r.end && r.start < s.range.end)
  };

  let mut extra = Vec::new();
  for m in YEAR.find_iter(text) {
    if !covered(&m.range(), &spans) {
      extra.push(FactSpan { range: m.range(), kind: FactKind::Year });
    }
  }
  spans.extend(extra);

  let mut extra = Vec::new();
  for m in FIGURE.find_iter(text) {
    if !covered(&m.range(), &spans) {
      extra.push(FactSpan { range: m.range(), kind: FactKind::Figure });
    }
  }
  spans.extend(extra);

  spans.sort_by_key(|s| s.range.start);
  spans
}
