//! Daily political issue research and persona warmup.
//!
//! | Method | Path                | Notes                                           |
//! |--------|---------------------|-------------------------------------------------|
//! | `GET`  | `/issues/today`     | Today's issue (KST); 404 when none yet           |
//! | `GET`  | `/issues/history`   | `?limit=` (default 14, max 60); newest first     |
//! | `GET`  | `/issues/{date}`    | `YYYY-MM-DD`                                     |
//! | `POST` | `/issues/research`  | `{force}`; feeds → candidates → LLM summary     |
//! | `POST` | `/issues/warmup`    | Bearer secret; one brief per persona            |
//! | `POST` | `/issues/backfill`  | Bearer secret; `{days}` (max 14) missing dates  |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{Days, NaiveDate, Utc};
use polichat_core::{
  debate::normalize_topic,
  issue::{
    Issue, RssItem, SaveOutcome, TopicBrief, brief_prompt, issue_prompt, kst_date, parse_issue,
    parse_points, pick_candidates, today_kst,
  },
  store::PolichatStore,
};
use polichat_llm::{Completion, Role};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AppState, auth::WarmupAuth, error::ApiError};

pub const DEFAULT_HISTORY: usize = 14;
pub const MAX_HISTORY: usize = 60;
pub const MAX_BACKFILL_DAYS: u32 = 14;
const MAX_CANDIDATES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
  /// Served from the in-process research cache.
  Cached,
  /// Already in the store; no research ran.
  Stored,
  Inserted,
  Replaced,
  /// Research ran but another writer saved the date first.
  Kept,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResearchResponse {
  pub issue:  Issue,
  pub status: ResearchStatus,
}

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
  #[serde(default)]
  pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct WarmupRequest {
  #[serde(default)]
  pub force: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WarmupReport {
  pub topic:   String,
  pub warmed:  Vec<String>,
  pub skipped: Vec<String>,
  pub failed:  Vec<String>,
}

fn default_backfill_days() -> u32 { 7 }

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
  #[serde(default = "default_backfill_days")]
  pub days: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BackfillReport {
  pub filled:  Vec<NaiveDate>,
  pub skipped: Vec<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
  pub limit: Option<usize>,
}

// ─── Read ────────────────────────────────────────────────────────────────────

pub async fn today<S>(State(state): State<AppState<S>>) -> Result<Json<Issue>, ApiError>
where
  S: PolichatStore + 'static,
{
  let date = today_kst();
  state
    .store
    .get_issue(date)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("no issue for {date}")))
}

pub async fn history<S>(
  State(state): State<AppState<S>>,
  Query(q): Query<HistoryQuery>,
) -> Json<Vec<Issue>>
where
  S: PolichatStore + 'static,
{
  let limit = q.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
  match state.store.list_issues(limit).await {
    Ok(issues) => Json(issues),
    Err(e) => {
      warn!(error = %e, "issue history unavailable");
      Json(Vec::new())
    }
  }
}

pub async fn by_date<S>(
  State(state): State<AppState<S>>,
  Path(date): Path<String>,
) -> Result<Json<Issue>, ApiError>
where
  S: PolichatStore + 'static,
{
  let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
    .map_err(|_| ApiError::BadRequest(format!("invalid date {date:?}, expected YYYY-MM-DD")))?;
  state
    .store
    .get_issue(date)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("no issue for {date}")))
}

// ─── Research ────────────────────────────────────────────────────────────────

pub async fn research<S>(
  State(state): State<AppState<S>>,
  Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>, ApiError>
where
  S: PolichatStore + 'static,
{
  research_issue(&state, today_kst(), req.force).await.map(Json)
}

/// Items published on `date` (KST). Undated items count when
/// `include_undated` is set.
fn items_on(items: &[RssItem], date: NaiveDate, include_undated: bool) -> Vec<RssItem> {
  items
    .iter()
    .filter(|i| i.pub_date.map_or(include_undated, |at| kst_date(at) == date))
    .cloned()
    .collect()
}

/// Ask the issue model to pick and summarise one headline. `None` only when
/// there are no usable headlines; a failed model call falls back to the
/// first candidate.
async fn summarise<S>(state: &AppState<S>, date: NaiveDate, items: &[RssItem]) -> Option<Issue> {
  let candidates = pick_candidates(items, MAX_CANDIDATES);
  if candidates.is_empty() {
    return None;
  }
  let route = state.llm.route(Role::Issue);
  let completion = Completion::from_prompt(route.model.clone(), &issue_prompt(&candidates, date));
  let text = route.provider.complete(&completion).await.unwrap_or_else(|e| {
    warn!(%date, error = %e, "issue summary failed, using top headline");
    String::new()
  });
  parse_issue(&text, date, &candidates)
}

async fn research_issue<S>(
  state: &AppState<S>,
  date: NaiveDate,
  force: bool,
) -> Result<ResearchResponse, ApiError>
where
  S: PolichatStore,
{
  if !force {
    if let Some(issue) = state.research.get(&date) {
      return Ok(ResearchResponse { issue, status: ResearchStatus::Cached });
    }
    if let Some(issue) = state.store.get_issue(date).await.map_err(ApiError::store)? {
      state.research.insert(date, issue.clone());
      return Ok(ResearchResponse { issue, status: ResearchStatus::Stored });
    }
  }

  let items = state.feeds.fetch().await.map_err(|e| ApiError::Upstream(e.to_string()))?;
  let mut todays = items_on(&items, date, true);
  if todays.is_empty() {
    todays = items;
  }
  let issue = summarise(state, date, &todays)
    .await
    .ok_or_else(|| ApiError::Upstream("no usable headlines in the configured feeds".into()))?;

  let (issue, status) = match state.store.save_issue(issue.clone(), force).await.map_err(ApiError::store)? {
    SaveOutcome::Inserted => (issue, ResearchStatus::Inserted),
    SaveOutcome::Replaced => (issue, ResearchStatus::Replaced),
    SaveOutcome::Kept(existing) => (existing, ResearchStatus::Kept),
  };
  info!(%date, title = %issue.title, ?status, "researched issue");
  state.research.insert(date, issue.clone());
  Ok(ResearchResponse { issue, status })
}

// ─── Warmup ──────────────────────────────────────────────────────────────────

pub async fn warmup<S>(
  _auth: WarmupAuth,
  State(state): State<AppState<S>>,
  Json(req): Json<WarmupRequest>,
) -> Result<Json<WarmupReport>, ApiError>
where
  S: PolichatStore + 'static,
{
  let issue = research_issue(&state, today_kst(), false).await?.issue;
  let topic = normalize_topic(&issue.title);
  let personas = state.store.list_personas().await.map_err(ApiError::store)?;
  let route = state.llm.route(Role::Issue);

  let mut report = WarmupReport { topic: topic.clone(), ..Default::default() };
  for persona in personas {
    if !req.force
      && state.store.get_brief(&topic, &persona.id).await.map_err(ApiError::store)?.is_some()
    {
      report.skipped.push(persona.id);
      continue;
    }

    let prompt = brief_prompt(&topic, &issue.summary, &persona);
    let points = match route.provider.complete(&Completion::from_prompt(route.model.clone(), &prompt)).await {
      Ok(text) => parse_points(&text),
      Err(e) => {
        warn!(persona = %persona.id, error = %e, "brief generation failed");
        Vec::new()
      }
    };
    if points.is_empty() {
      report.failed.push(persona.id);
      continue;
    }

    let brief = TopicBrief { topic: topic.clone(), persona_id: persona.id.clone(), points, created_at: Utc::now() };
    state.store.put_brief(brief).await.map_err(ApiError::store)?;
    report.warmed.push(persona.id);
  }

  info!(
    %topic,
    warmed = report.warmed.len(),
    skipped = report.skipped.len(),
    failed = report.failed.len(),
    "warmup finished"
  );
  Ok(Json(report))
}

// ─── Backfill ────────────────────────────────────────────────────────────────

pub async fn backfill<S>(
  _auth: WarmupAuth,
  State(state): State<AppState<S>>,
  Json(req): Json<BackfillRequest>,
) -> Result<Json<BackfillReport>, ApiError>
where
  S: PolichatStore + 'static,
{
  let days = req.days.clamp(1, MAX_BACKFILL_DAYS);
  let items = state.feeds.fetch().await.map_err(|e| ApiError::Upstream(e.to_string()))?;
  let today = today_kst();

  let mut report = BackfillReport::default();
  for offset in 1..=days {
    let Some(date) = today.checked_sub_days(Days::new(u64::from(offset))) else { break };
    if state.store.get_issue(date).await.map_err(ApiError::store)?.is_some() {
      report.skipped.push(date);
      continue;
    }
    let Some(issue) = summarise(&state, date, &items_on(&items, date, false)).await else {
      report.skipped.push(date);
      continue;
    };
    match state.store.save_issue(issue, false).await.map_err(ApiError::store)? {
      SaveOutcome::Kept(_) => report.skipped.push(date),
      SaveOutcome::Inserted | SaveOutcome::Replaced => report.filled.push(date),
    }
  }

  info!(days, filled = report.filled.len(), "backfill finished");
  Ok(Json(report))
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  fn item(title: &str, at: Option<(u32, u32)>) -> RssItem {
    RssItem {
      title: title.into(),
      pub_date: at.map(|(d, h)| Utc.with_ymd_and_hms(2024, 10, d, h, 0, 0).unwrap()),
      ..Default::default()
    }
  }

  #[test]
  fn items_are_bucketed_by_korean_date() {
    let day = NaiveDate::from_ymd_opt(2024, 10, 14).unwrap();
    // 16:00 UTC on the 13th is already the 14th in Seoul.
    let items = vec![item("a", Some((13, 16))), item("b", Some((13, 10))), item("c", None)];

    let strict: Vec<_> = items_on(&items, day, false).into_iter().map(|i| i.title).collect();
    assert_eq!(strict, vec!["a"]);

    let loose: Vec<_> = items_on(&items, day, true).into_iter().map(|i| i.title).collect();
    assert_eq!(loose, vec!["a", "c"]);
  }
}
