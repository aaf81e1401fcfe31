//! "Issue of the day": RSS ingestion, headline cleanup, and the LLM steps that
//! turn headlines into a debate topic and per-persona talking points.

use std::{collections::HashSet, sync::LazyLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use quick_xml::events::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  debate::{Prompt, extract_json_object},
  persona::Persona,
};

/// Korean Standard Time, UTC+9, no daylight saving.
const KST_OFFSET_HOURS: i64 = 9;

const MIN_TITLE_CHARS: usize = 8;
const MAX_POINTS: usize = 5;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
  pub date:           NaiveDate,
  pub title:          String,
  pub summary:        String,
  #[serde(default)]
  pub talking_points: Vec<String>,
  pub source_url:     Option<String>,
  pub created_at:     DateTime<Utc>,
}

/// Outcome of persisting an issue for a date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
  Inserted,
  Replaced,
  /// A row already existed and `force` was not set; holds the existing row.
  Kept(Issue),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssItem {
  pub title:       String,
  pub link:        Option<String>,
  pub pub_date:    Option<DateTime<Utc>>,
  pub description: Option<String>,
}

/// Warmed-up talking points for one persona on one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBrief {
  pub topic:      String,
  pub persona_id: String,
  pub points:     Vec<String>,
  pub created_at: DateTime<Utc>,
}

// ─── Dates ───────────────────────────────────────────────────────────────────

pub fn kst_date(at: DateTime<Utc>) -> NaiveDate {
  (at + Duration::hours(KST_OFFSET_HOURS)).date_naive()
}

pub fn today_kst() -> NaiveDate { kst_date(Utc::now()) }

// ─── RSS ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Field {
  Title,
  Link,
  PubDate,
  Description,
}

fn local_name(name: &[u8]) -> &[u8] {
  match name.iter().rposition(|&b| b == b':') {
    Some(pos) => &name[pos + 1..],
    None => name,
  }
}

/// Parse the `<item>` elements of an RSS 2.0 document.
pub fn parse_rss(xml: &str) -> Result<Vec<RssItem>> {
  let mut reader = quick_xml::Reader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut items = Vec::new();
  let mut current: Option<RssItem> = None;
  let mut field: Option<Field> = None;
  let mut text = String::new();
  let mut buf = Vec::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => {
        let name = e.name();
        match local_name(name.as_ref()) {
          b"item" => current = Some(RssItem::default()),
          b"title" if current.is_some() => field = Some(Field::Title),
          b"link" if current.is_some() => field = Some(Field::Link),
          b"pubDate" if current.is_some() => field = Some(Field::PubDate),
          b"description" if current.is_some() => field = Some(Field::Description),
          _ => {}
        }
        text.clear();
      }
      Ok(Event::Text(ref e)) if field.is_some() => match e.unescape() {
        Ok(s) => text.push_str(&s),
        Err(_) => text.push_str(&String::from_utf8_lossy(&e[..])),
      },
      Ok(Event::CData(ref e)) if field.is_some() => {
        text.push_str(&String::from_utf8_lossy(&e[..]));
      }
      Ok(Event::End(ref e)) => {
        let name = e.name();
        let local = local_name(name.as_ref());
        if local == b"item" {
          if let Some(item) = current.take().filter(|i| !i.title.trim().is_empty()) {
            items.push(item);
          }
        } else if let (Some(f), Some(item)) = (field.take(), current.as_mut()) {
          let value = std::mem::take(&mut text).trim().to_owned();
          match f {
            Field::Title => item.title = value,
            Field::Link => item.link = Some(value).filter(|v| !v.is_empty()),
            Field::PubDate => {
              item.pub_date = DateTime::parse_from_rfc2822(&value)
                .ok()
                .map(|d| d.with_timezone(&Utc));
            }
            Field::Description => {
              item.description = Some(strip_html(&value)).filter(|v| !v.is_empty());
            }
          }
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Rss(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  Ok(items)
}

// ─── Headline cleanup ────────────────────────────────────────────────────────

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

static BRACKETS: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\[[^\]]{1,12}\]|【[^】]{1,12}】|\((?:종합|속보|단독|영상|포토|\d보)\)")
    .expect("bracket regex")
});

static SOURCE_SUFFIX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\s+[-|ㅣ]\s+[^-|ㅣ]{1,20}$").expect("suffix regex"));

fn decode_entities(s: &str) -> String {
  s.replace("&nbsp;", " ")
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&apos;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&")
}

fn collapse_ws(s: &str) -> String { s.split_whitespace().collect::<Vec<_>>().join(" ") }

fn strip_html(s: &str) -> String { collapse_ws(&TAGS.replace_all(&decode_entities(s), " ")) }

/// Turn a raw news headline into a clean topic line.
pub fn clean_title(raw: &str) -> String {
  let s = strip_html(raw);
  let s = BRACKETS.replace_all(&s, " ");
  let s = collapse_ws(&s);
  let s = SOURCE_SUFFIX.replace(&s, "");
  s.trim().to_owned()
}

/// Dedupe by cleaned title and drop headlines too short to debate.
/// Feed order is preserved; returned items carry cleaned titles.
pub fn pick_candidates(items: &[RssItem], limit: usize) -> Vec<RssItem> {
  let mut seen = HashSet::new();
  items
    .iter()
    .filter_map(|item| {
      let title = clean_title(&item.title);
      if title.chars().count() < MIN_TITLE_CHARS || !seen.insert(title.clone()) {
        return None;
      }
      Some(RssItem { title, ..item.clone() })
    })
    .take(limit)
    .collect()
}

// ─── LLM steps ───────────────────────────────────────────────────────────────

fn truncate_chars(s: &str, n: usize) -> String { s.chars().take(n).collect() }

pub fn issue_prompt(candidates: &[RssItem], date: NaiveDate) -> Prompt {
  let system = "당신은 정치 토론 프로그램의 작가입니다. 오늘의 뉴스 헤드라인 중에서 \
                여야가 가장 첨예하게 맞설 만한 이슈 하나를 고르고 아래 JSON으로만 답하세요.\n\
                {\"source_index\": 번호, \"title\": \"토론 주제 한 줄\", \"summary\": \"3문장 이내 배경 설명\", \
                \"talking_points\": [\"쟁점1\", \"쟁점2\", \"쟁점3\"]}"
    .to_owned();

  let mut user = format!("{date} 헤드라인:\n");
  for (i, item) in candidates.iter().enumerate() {
    user.push_str(&format!("{}. {}\n", i + 1, item.title));
    if let Some(d) = &item.description {
      user.push_str(&format!("   {}\n", truncate_chars(d, 200)));
    }
  }
  Prompt { system, user }
}

#[derive(Deserialize)]
struct RawIssue {
  source_index:   Option<usize>,
  #[serde(default)]
  title:          String,
  #[serde(default)]
  summary:        String,
  #[serde(default)]
  talking_points: Vec<String>,
}

/// Build an [`Issue`] from the model's answer, falling back to the first
/// candidate when the answer is unusable. `None` only without candidates.
pub fn parse_issue(text: &str, date: NaiveDate, candidates: &[RssItem]) -> Option<Issue> {
  let first = candidates.first()?;
  let raw = extract_json_object(text).and_then(|j| serde_json::from_str::<RawIssue>(j).ok());

  let issue = match raw {
    Some(raw) if !raw.title.trim().is_empty() => {
      let source = raw
        .source_index
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| candidates.get(i))
        .unwrap_or(first);
      Issue {
        date,
        title: raw.title.trim().to_owned(),
        summary: if raw.summary.trim().is_empty() {
          source.description.clone().unwrap_or_default()
        } else {
          raw.summary.trim().to_owned()
        },
        talking_points: raw
          .talking_points
          .into_iter()
          .map(|p| p.trim().to_owned())
          .filter(|p| !p.is_empty())
          .take(MAX_POINTS)
          .collect(),
        source_url: source.link.clone(),
        created_at: Utc::now(),
      }
    }
    _ => Issue {
      date,
      title: first.title.clone(),
      summary: first.description.clone().unwrap_or_default(),
      talking_points: Vec::new(),
      source_url: first.link.clone(),
      created_at: Utc::now(),
    },
  };
  Some(issue)
}

pub fn brief_prompt(topic: &str, summary: &str, persona: &Persona) -> Prompt {
  let system = format!(
    "당신은 {}의 토론 준비를 돕는 보좌관입니다. 그의 평소 입장과 말투에 맞춰 \
     주어진 주제에 대해 토론에서 쓸 핵심 논점 3~5개를 JSON 문자열 배열로만 답하세요.",
    persona.display_name()
  );
  let mut user = format!("주제: {topic}\n배경: {summary}\n");
  if !persona.stance.is_empty() {
    user.push_str(&format!("평소 입장:\n{}\n", truncate_chars(&persona.stance, 1_500)));
  }
  Prompt { system, user }
}

/// Talking points from a JSON array or, failing that, a bulleted list.
pub fn parse_points(text: &str) -> Vec<String> {
  let from_json = text
    .find('[')
    .zip(text.rfind(']'))
    .filter(|(s, e)| e > s)
    .and_then(|(s, e)| serde_json::from_str::<Vec<String>>(&text[s..=e]).ok());

  let points: Vec<String> = match from_json {
    Some(points) => points,
    None => text
      .lines()
      .map(|l| {
        l.trim()
          .trim_start_matches(['-', '*', '•'])
          .trim_start_matches(|c: char| c.is_ascii_digit())
          .trim_start_matches(['.', ')'])
          .trim()
          .to_owned()
      })
      .collect(),
  };

  points
    .into_iter()
    .map(|p| p.trim().to_owned())
    .filter(|p| !p.is_empty())
    .take(MAX_POINTS)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>정치 뉴스</title>
  <item>
    <title><![CDATA[[속보] 국회, 전세사기 특별법 개정안 통과 - 한국일보]]></title>
    <link>https://news.example/1</link>
    <pubDate>Mon, 14 Oct 2024 09:30:00 +0900</pubDate>
    <description>&lt;b&gt;여야&lt;/b&gt; 합의로 처리</description>
  </item>
  <item>
    <title>국회, 전세사기 특별법 개정안 통과 - 연합뉴스</title>
    <link>https://news.example/2</link>
  </item>
  <item>
    <title>짧은 제목</title>
  </item>
  <item>
    <title>【단독】 최저임금 인상 폭 두고 노사 격돌 | 경향신문</title>
  </item>
</channel></rss>"#;

  #[test]
  fn parses_items_with_cdata_and_dates() {
    let items = parse_rss(FEED).unwrap();
    assert_eq!(items.len(), 4);
    assert!(items[0].title.starts_with("[속보]"));
    assert_eq!(items[0].link.as_deref(), Some("https://news.example/1"));
    assert_eq!(items[0].description.as_deref(), Some("여야 합의로 처리"));
    let date = items[0].pub_date.unwrap();
    assert_eq!(kst_date(date), NaiveDate::from_ymd_opt(2024, 10, 14).unwrap());
  }

  #[test]
  fn channel_title_is_not_an_item() {
    let items = parse_rss(FEED).unwrap();
    assert!(items.iter().all(|i| i.title != "정치 뉴스"));
  }

  #[test]
  fn malformed_xml_is_an_error() {
    assert!(parse_rss("<rss><channel><item><title>x</channel>").is_err());
  }

  #[test]
  fn cleans_tags_and_source_suffix() {
    assert_eq!(
      clean_title("[속보] 국회, 전세사기 특별법 개정안 통과 - 한국일보"),
      "국회, 전세사기 특별법 개정안 통과"
    );
    assert_eq!(
      clean_title("【단독】 최저임금 인상 폭 두고 노사 격돌 | 경향신문"),
      "최저임금 인상 폭 두고 노사 격돌"
    );
    assert_eq!(clean_title("여당 &quot;민생&quot; 강조 (종합)"), "여당 \"민생\" 강조");
  }

  #[test]
  fn candidates_are_deduped_and_filtered() {
    let items = parse_rss(FEED).unwrap();
    let picked = pick_candidates(&items, 10);
    let titles: Vec<&str> = picked.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(
      titles,
      vec!["국회, 전세사기 특별법 개정안 통과", "최저임금 인상 폭 두고 노사 격돌"]
    );
    assert_eq!(pick_candidates(&items, 1).len(), 1);
  }

  #[test]
  fn parse_issue_uses_selected_source() {
    let candidates = pick_candidates(&parse_rss(FEED).unwrap(), 10);
    let date = NaiveDate::from_ymd_opt(2024, 10, 14).unwrap();
    let answer = r#"{"source_index": 2, "title": "최저임금 인상, 어디까지?", "summary": "노사가 맞섰다.", "talking_points": ["물가", " ", "고용"]}"#;
    let issue = parse_issue(answer, date, &candidates).unwrap();
    assert_eq!(issue.title, "최저임금 인상, 어디까지?");
    assert_eq!(issue.talking_points, vec!["물가", "고용"]);
    assert_eq!(issue.source_url, None);
  }

  #[test]
  fn parse_issue_falls_back_to_first_candidate() {
    let candidates = pick_candidates(&parse_rss(FEED).unwrap(), 10);
    let date = NaiveDate::from_ymd_opt(2024, 10, 14).unwrap();
    let issue = parse_issue("죄송합니다", date, &candidates).unwrap();
    assert_eq!(issue.title, "국회, 전세사기 특별법 개정안 통과");
    assert_eq!(issue.source_url.as_deref(), Some("https://news.example/1"));
    assert!(parse_issue("{}", date, &[]).is_none());
  }

  #[test]
  fn points_from_json_or_bullets() {
    assert_eq!(parse_points(r#"["하나", "둘"]"#), vec!["하나", "둘"]);
    assert_eq!(parse_points("1. 하나\n- 둘\n\n• 셋"), vec!["하나", "둘", "셋"]);
  }

  #[test]
  fn kst_rolls_over_at_fifteen_utc() {
    let before = DateTime::parse_from_rfc3339("2024-10-14T14:59:00Z").unwrap().with_timezone(&Utc);
    let after = DateTime::parse_from_rfc3339("2024-10-14T15:00:00Z").unwrap().with_timezone(&Utc);
    assert_eq!(kst_date(before).to_string(), "2024-10-14");
    assert_eq!(kst_date(after).to_string(), "2024-10-15");
  }
}
