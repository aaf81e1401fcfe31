//! Personas: the configured identity a model speaks as.
//!
//! A persona owns a slug id, a few identity fields and any number of markdown
//! knowledge files. The system prompt for a chat is assembled on request from
//! those pieces plus what the persona remembers about the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, intimacy::Intimacy, memory::UserMemory};

/// Upper bound on knowledge text embedded into one system prompt.
pub const KNOWLEDGE_BUDGET_CHARS: usize = 12_000;

/// Chunk size used for knowledge retrieval.
pub const KNOWLEDGE_CHUNK_CHARS: usize = 800;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
  /// Lowercase slug, e.g. `kim-minjun`.
  pub id:           String,
  pub name:         String,
  pub party:        Option<String>,
  /// Office or role, e.g. "국회의원".
  pub title:        Option<String>,
  /// Free-form description of the speaking style.
  pub tone:         Option<String>,
  #[serde(default)]
  pub catchphrases: Vec<String>,
  /// Political positions and background, usually the markdown body.
  #[serde(default)]
  pub stance:       String,
  pub updated_at:   DateTime<Utc>,
}

/// A markdown document attached to a persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeFile {
  pub persona_id: String,
  /// File name, unique per persona (e.g. `speech-style.md`).
  pub name:       String,
  pub content:    String,
  pub updated_at: DateTime<Utc>,
}

/// A paragraph-sized piece of a knowledge file returned by retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
  pub persona_id: String,
  pub source:     String,
  pub text:       String,
}

// ─── Validation and parsing ──────────────────────────────────────────────────

/// Accept `[a-z0-9-]+` without leading/trailing hyphens.
pub fn validate_id(id: &str) -> Result<()> {
  let valid = !id.is_empty()
    && id.len() <= 64
    && !id.starts_with('-')
    && !id.ends_with('-')
    && id
      .bytes()
      .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
  if valid { Ok(()) } else { Err(Error::InvalidPersonaId(id.to_owned())) }
}

impl Persona {
  /// Parse a static persona file.
  ///
  /// ```text
  /// ---
  /// name: 김민준
  /// party: 미래당
  /// catchphrases: 국민만 보고 갑니다, 현장에 답이 있습니다
  /// ---
  /// 경제 성장과 지역 균형 발전을 강조한다.
  /// ```
  pub fn from_markdown(id: &str, text: &str) -> Result<Self> {
    validate_id(id)?;
    let (front, body) = split_frontmatter(text);

    let mut persona = Persona {
      id:           id.to_owned(),
      name:         String::new(),
      party:        None,
      title:        None,
      tone:         None,
      catchphrases: Vec::new(),
      stance:       body.trim().to_owned(),
      updated_at:   Utc::now(),
    };

    for line in front.lines() {
      let Some((key, value)) = line.split_once(':') else { continue };
      let value = value.trim();
      if value.is_empty() {
        continue;
      }
      match key.trim() {
        "name" => persona.name = value.to_owned(),
        "party" => persona.party = Some(value.to_owned()),
        "title" => persona.title = Some(value.to_owned()),
        "tone" => persona.tone = Some(value.to_owned()),
        "catchphrases" => {
          persona.catchphrases = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        }
        _ => {}
      }
    }

    if persona.name.is_empty() {
      return Err(Error::MissingPersonaName(id.to_owned()));
    }
    Ok(persona)
  }

  /// "이름 (정당 직함)" for prompts and transcripts.
  pub fn display_name(&self) -> String {
    match (&self.party, &self.title) {
      (Some(p), Some(t)) => format!("{} ({p} {t})", self.name),
      (Some(x), None) | (None, Some(x)) => format!("{} ({x})", self.name),
      (None, None) => self.name.clone(),
    }
  }
}

fn split_frontmatter(text: &str) -> (&str, &str) {
  let trimmed = text.trim_start_matches('\u{feff}');
  let Some(rest) = trimmed.strip_prefix("---") else {
    return ("", trimmed);
  };
  let rest = rest.trim_start_matches(['\r', '\n']);
  match rest.find("\n---") {
    Some(end) => {
      let front = &rest[..end];
      let body = &rest[end + 4..];
      (front, body.trim_start_matches(['\r', '\n']))
    }
    None => ("", trimmed),
  }
}

/// Split a knowledge document into blank-line separated chunks of at most
/// `max_chars` characters. Oversized paragraphs are cut on char boundaries.
pub fn chunk_knowledge(text: &str, max_chars: usize) -> Vec<String> {
  let max_chars = max_chars.max(1);
  let mut chunks = Vec::new();
  let mut current = String::new();

  for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
    let para_len = para.chars().count();
    let cur_len = current.chars().count();

    if cur_len > 0 && cur_len + 2 + para_len > max_chars {
      chunks.push(std::mem::take(&mut current));
    }

    if para_len > max_chars {
      let chars: Vec<char> = para.chars().collect();
      for piece in chars.chunks(max_chars) {
        chunks.push(piece.iter().collect());
      }
      continue;
    }

    if !current.is_empty() {
      current.push_str("\n\n");
    }
    current.push_str(para);
  }

  if !current.is_empty() {
    chunks.push(current);
  }
  chunks
}

/// Retrieval over a persona's knowledge: chunks containing any whitespace
/// separated query term, ranked by total hits, best first.
pub fn rank_chunks(files: &[KnowledgeFile], query: &str, limit: usize) -> Vec<KnowledgeChunk> {
  let terms: Vec<String> = query
    .split_whitespace()
    .filter(|t| t.chars().count() >= 2)
    .map(str::to_lowercase)
    .collect();
  if terms.is_empty() || limit == 0 {
    return Vec::new();
  }

  let mut scored: Vec<(usize, KnowledgeChunk)> = files
    .iter()
    .flat_map(|f| {
      chunk_knowledge(&f.content, KNOWLEDGE_CHUNK_CHARS).into_iter().map(|text| KnowledgeChunk {
        persona_id: f.persona_id.clone(),
        source: f.name.clone(),
        text,
      })
    })
    .filter_map(|chunk| {
      let haystack = chunk.text.to_lowercase();
      let hits: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
      (hits > 0).then_some((hits, chunk))
    })
    .collect();

  // Stable sort keeps document order among equal scores.
  scored.sort_by(|a, b| b.0.cmp(&a.0));
  scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

// ─── System prompt ───────────────────────────────────────────────────────────

/// Builder for the chat system prompt of one persona.
pub struct SystemPrompt<'a> {
  persona:   &'a Persona,
  knowledge: &'a [KnowledgeFile],
  retrieved: &'a [KnowledgeChunk],
  memory:    Option<&'a UserMemory>,
  intimacy:  Option<&'a Intimacy>,
}

impl<'a> SystemPrompt<'a> {
  pub fn new(persona: &'a Persona) -> Self {
    Self { persona, knowledge: &[], retrieved: &[], memory: None, intimacy: None }
  }

  pub fn knowledge(mut self, files: &'a [KnowledgeFile]) -> Self {
    self.knowledge = files;
    self
  }

  pub fn retrieved(mut self, chunks: &'a [KnowledgeChunk]) -> Self {
    self.retrieved = chunks;
    self
  }

  pub fn memory(mut self, memory: Option<&'a UserMemory>) -> Self {
    self.memory = memory;
    self
  }

  pub fn intimacy(mut self, intimacy: Option<&'a Intimacy>) -> Self {
    self.intimacy = intimacy;
    self
  }

  pub fn build(&self) -> String {
    let p = self.persona;
    let mut out = format!(
      "당신은 {}입니다. 대한민국 정치인 {}의 AI 페르소나로서 사용자와 1:1로 대화합니다.\n",
      p.display_name(),
      p.name
    );
    out.push_str("실제 인물의 공개된 입장과 말투를 따르되, 확인되지 않은 사실을 지어내지 마세요.\n");
    out.push_str("답변은 메신저 대화처럼 짧은 문장 몇 개로 하세요.\n");

    if let Some(tone) = &p.tone {
      out.push_str(&format!("\n말투: {tone}\n"));
    }
    if !p.catchphrases.is_empty() {
      out.push_str(&format!("자주 쓰는 표현: {}\n", p.catchphrases.join(" / ")));
    }
    if !p.stance.is_empty() {
      out.push_str(&format!("\n# 입장과 배경\n{}\n", p.stance));
    }

    let mut budget = KNOWLEDGE_BUDGET_CHARS;
    for file in self.knowledge {
      if budget == 0 {
        break;
      }
      let body: String = file.content.chars().take(budget).collect();
      budget -= body.chars().count();
      out.push_str(&format!("\n## {}\n{}\n", file.name, body.trim()));
    }

    if !self.retrieved.is_empty() {
      out.push_str("\n# 관련 자료\n");
      for chunk in self.retrieved {
        out.push_str(&format!("- ({}) {}\n", chunk.source, chunk.text.trim()));
      }
    }

    if let Some(m) = self.memory.filter(|m| m.total_messages > 0 || !m.facts.is_empty()) {
      out.push_str("\n# 이 사용자에 대해 기억하는 것\n");
      if m.total_messages > 0 {
        out.push_str(&format!(
          "지금까지 {}개의 메시지를 주고받았고 호감도는 {}/100입니다.\n",
          m.total_messages, m.affinity_score
        ));
      }
      for fact in &m.facts {
        out.push_str(&format!("- {fact}\n"));
      }
    }

    if let Some(i) = self.intimacy {
      out.push_str(&format!(
        "\n친밀도 레벨 {}: 레벨이 높을수록 더 편하고 친근하게 대하세요.\n",
        i.level
      ));
    }

    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = "---\nname: 김민준\nparty: 미래당\ntitle: 국회의원\ncatchphrases: 국민만 보고 갑니다, 현장에 답이 있습니다\n---\n경제 성장을 강조한다.\n";

  #[test]
  fn parses_frontmatter_and_body() {
    let p = Persona::from_markdown("kim-minjun", SAMPLE).unwrap();
    assert_eq!(p.name, "김민준");
    assert_eq!(p.party.as_deref(), Some("미래당"));
    assert_eq!(p.catchphrases.len(), 2);
    assert_eq!(p.stance, "경제 성장을 강조한다.");
    assert_eq!(p.display_name(), "김민준 (미래당 국회의원)");
  }

  #[test]
  fn missing_name_is_an_error() {
    let err = Persona::from_markdown("x", "---\nparty: 무소속\n---\nbody").unwrap_err();
    assert!(matches!(err, Error::MissingPersonaName(_)));
  }

  #[test]
  fn rejects_bad_ids() {
    assert!(validate_id("kim-minjun").is_ok());
    assert!(validate_id("Kim").is_err());
    assert!(validate_id("-kim").is_err());
    assert!(validate_id("").is_err());
    assert!(validate_id("../etc").is_err());
  }

  #[test]
  fn chunking_respects_limit() {
    let text = "첫 문단입니다.\n\n둘째 문단입니다.\n\n셋째 문단은 조금 더 깁니다.";
    let chunks = chunk_knowledge(text, 20);
    assert!(chunks.len() >= 2);
    assert!(chunks.iter().all(|c| c.chars().count() <= 20));

    let long = "가".repeat(45);
    let chunks = chunk_knowledge(&long, 20);
    assert_eq!(chunks.len(), 3);
  }

  #[test]
  fn ranking_prefers_more_hits() {
    let file = |name: &str, content: &str| KnowledgeFile {
      persona_id: "kim".into(),
      name:       name.into(),
      content:    content.into(),
      updated_at: Utc::now(),
    };
    let files = vec![
      file("a.md", "부동산 정책은 시장에 맡겨야 합니다."),
      file("b.md", "부동산 세제와 부동산 공급을 함께 봐야 합니다.\n\n교육은 별개입니다."),
      file("c.md", "외교 현안입니다."),
    ];
    let hits = rank_chunks(&files, "부동산", 5);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].source, "b.md");
    assert!(rank_chunks(&files, "  ", 5).is_empty());
  }

  #[test]
  fn prompt_includes_memory_and_knowledge() {
    let p = Persona::from_markdown("kim-minjun", SAMPLE).unwrap();
    let files = vec![KnowledgeFile {
      persona_id: p.id.clone(),
      name:       "policy.md".into(),
      content:    "기본소득 반대".into(),
      updated_at: Utc::now(),
    }];
    let mut memory = UserMemory::new("u1", &p.id);
    memory.record_message();
    memory.add_fact("대학생");

    let prompt = SystemPrompt::new(&p).knowledge(&files).memory(Some(&memory)).build();
    assert!(prompt.contains("## policy.md"));
    assert!(prompt.contains("기본소득 반대"));
    assert!(prompt.contains("- 대학생"));
    assert!(prompt.contains("국민만 보고 갑니다"));
  }

  #[test]
  fn facts_reach_prompt_before_first_message() {
    let p = Persona::from_markdown("kim-minjun", SAMPLE).unwrap();
    let mut memory = UserMemory::new("u1", &p.id);
    memory.add_fact("부산 출신");

    let prompt = SystemPrompt::new(&p).memory(Some(&memory)).build();
    assert!(prompt.contains("# 이 사용자에 대해 기억하는 것"));
    assert!(prompt.contains("- 부산 출신"));
    assert!(!prompt.contains("메시지를 주고받았고"));

    let blank = UserMemory::new("u1", &p.id);
    let prompt = SystemPrompt::new(&p).memory(Some(&blank)).build();
    assert!(!prompt.contains("기억하는 것"));
  }
}
