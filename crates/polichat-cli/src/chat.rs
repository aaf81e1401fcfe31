//! One-on-one chat with a persona.
//!
//! Input keeps flowing while a reply streams; the latest line typed during a
//! stream waits in a single slot and is sent when the reply ends.

use std::{io::Write, time::Duration};

use anyhow::{Result, anyhow};
use crossterm::style::Stylize;
use futures_util::StreamExt as _;
use polichat_core::{
  bubble::BubbleSplitter,
  message::{ChatMessage, Role},
  persona::Persona,
  queue::{SendQueue, Submit},
  typing::typing_delay,
};
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
  client::{ApiClient, ChatRequest, ReplyStream},
  debate::{Pace, write_highlighted},
};

const QUIT: [&str; 2] = ["/quit", "/exit"];
const SEND_ATTEMPTS: u32 = 3;
const SEND_BACKOFF: Duration = Duration::from_secs(1);

/// Conversation state, independent of the terminal.
#[derive(Debug)]
pub struct ChatSession {
  persona_id: String,
  user_id:    Option<String>,
  history:    Vec<ChatMessage>,
  queue:      SendQueue,
}

impl ChatSession {
  pub fn new(persona_id: impl Into<String>, user_id: Option<String>) -> Self {
    Self { persona_id: persona_id.into(), user_id, history: Vec::new(), queue: SendQueue::new() }
  }

  pub fn history(&self) -> &[ChatMessage] { &self.history }

  pub fn is_streaming(&self) -> bool { self.queue.is_streaming() }

  fn request(&self) -> ChatRequest {
    ChatRequest {
      persona_id: self.persona_id.clone(),
      user_id:    self.user_id.clone(),
      messages:   self.history.clone(),
    }
  }

  /// Offer a typed line. Returns the request to send when nothing is in
  /// flight; otherwise the line is parked.
  pub fn submit(&mut self, text: &str) -> (Submit, Option<ChatRequest>) {
    let submit = self.queue.submit(text.trim());
    let request = match &submit {
      Submit::SendNow(text) => {
        self.history.push(ChatMessage::user(text.clone()));
        Some(self.request())
      }
      Submit::Queued | Submit::Replaced { .. } => None,
    };
    (submit, request)
  }

  /// Record a finished reply and release the parked line, if any.
  pub fn complete(&mut self, reply: &str) -> Option<ChatRequest> {
    let reply = reply.trim();
    if !reply.is_empty() {
      self.history.push(ChatMessage::assistant(reply));
    }
    self.release()
  }

  /// Drop the unanswered user line and release the parked one, if any.
  pub fn fail(&mut self) -> Option<ChatRequest> {
    if self.history.last().is_some_and(|m| m.role == Role::User) {
      self.history.pop();
    }
    self.release()
  }

  fn release(&mut self) -> Option<ChatRequest> {
    let next = self.queue.complete()?;
    self.history.push(ChatMessage::user(next));
    Some(self.request())
  }
}

fn stdin_lines() -> mpsc::Receiver<String> {
  let (tx, rx) = mpsc::channel(16);
  tokio::spawn(async move {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      if tx.send(line).await.is_err() {
        break;
      }
    }
  });
  rx
}

/// The reply being streamed, with its bubble state.
struct Reply {
  stream:   ReplyStream,
  splitter: BubbleSplitter,
  text:     String,
}

/// Open a reply stream, retrying with a fixed pause between attempts.
async fn connect(client: &ApiClient, request: &ChatRequest) -> Result<ReplyStream> {
  let mut attempt = 1;
  loop {
    match client.chat(request).await {
      Ok(stream) => return Ok(stream),
      Err(e) if attempt < SEND_ATTEMPTS => {
        warn!(attempt, error = %e, "chat request failed; retrying");
        tokio::time::sleep(SEND_BACKOFF).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

async fn open(
  client: &ApiClient,
  session: &mut ChatSession,
  mut next: Option<ChatRequest>,
  out: &mut impl Write,
) -> Result<Option<Reply>> {
  while let Some(request) = next.take() {
    match connect(client, &request).await {
      Ok(stream) => return Ok(Some(Reply { stream, splitter: BubbleSplitter::new(), text: String::new() })),
      Err(e) => {
        warn!(error = %e, "chat request failed");
        writeln!(out, "{}", format!("  전송 실패: {e}").red())?;
        next = session.fail();
      }
    }
  }
  Ok(None)
}

async fn show(out: &mut impl Write, bubbles: Vec<String>, pace: Pace) -> Result<()> {
  for bubble in bubbles {
    if let Some(speed) = pace {
      tokio::time::sleep(typing_delay(&bubble, speed)).await;
    }
    write!(out, "  ")?;
    write_highlighted(out, &bubble)?;
    writeln!(out)?;
    out.flush()?;
  }
  Ok(())
}

/// Run the chat until `/quit`, end of input, or cancellation.
pub async fn run(
  client: &ApiClient,
  persona: &Persona,
  mut session: ChatSession,
  pace: Pace,
  mut out: impl Write,
  cancel: CancellationToken,
) -> Result<()> {
  writeln!(out, "{} {}", "💬".bold(), persona.display_name().bold())?;
  writeln!(out, "{}", "  /quit 로 종료합니다.".dim())?;

  let mut lines = stdin_lines();
  let mut input_open = true;
  let mut reply: Option<Reply> = None;

  loop {
    if !input_open && reply.is_none() {
      break;
    }
    tokio::select! {
      _ = cancel.cancelled() => break,
      line = lines.recv(), if input_open => {
        let Some(line) = line else {
          input_open = false;
          continue;
        };
        let line = line.trim();
        if line.is_empty() {
          continue;
        }
        if QUIT.contains(&line) {
          break;
        }
        match session.submit(line) {
          (Submit::SendNow(_), request) => {
            writeln!(out, "\n{}", format!("【{}】", persona.name).cyan().bold())?;
            reply = open(client, &mut session, request, &mut out).await?;
          }
          (Submit::Queued, _) => writeln!(out, "{}", "  (답변이 끝나면 보낼게요)".dim())?,
          (Submit::Replaced { dropped }, _) => {
            writeln!(out, "{}", format!("  (대기 중이던 \"{dropped}\" 대신 보낼게요)").dim())?
          }
        }
      }
      delta = async { reply.as_mut().ok_or_else(|| anyhow!("no reply"))?.stream.next().await.transpose() },
        if reply.is_some() =>
      {
        let Some(current) = reply.as_mut() else { continue };
        match delta {
          Ok(Some(delta)) => {
            current.text.push_str(&delta);
            let bubbles = current.splitter.push(&delta);
            show(&mut out, bubbles, pace).await?;
          }
          Ok(None) => {
            let mut done = reply.take().ok_or_else(|| anyhow!("no reply"))?;
            show(&mut out, done.splitter.finish(), pace).await?;
            let next = session.complete(&done.text);
            if next.is_some() {
              writeln!(out, "\n{}", format!("【{}】", persona.name).cyan().bold())?;
            }
            reply = open(client, &mut session, next, &mut out).await?;
          }
          Err(e) => {
            warn!(error = %e, "chat stream failed");
            writeln!(out, "{}", format!("  답변이 끊겼습니다: {e}").red())?;
            let next = session.fail();
            reply = open(client, &mut session, next, &mut out).await?;
          }
        }
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_line_is_sent_immediately() {
    let mut session = ChatSession::new("kim", Some("u1".into()));
    let (submit, request) = session.submit("  부동산 정책은요? ");
    assert_eq!(submit, Submit::SendNow("부동산 정책은요?".into()));
    let request = request.unwrap();
    assert_eq!(request.persona_id, "kim");
    assert_eq!(request.user_id.as_deref(), Some("u1"));
    assert_eq!(request.messages, vec![ChatMessage::user("부동산 정책은요?")]);
  }

  #[test]
  fn lines_typed_mid_stream_keep_only_the_latest() {
    let mut session = ChatSession::new("kim", None);
    session.submit("첫 질문");
    assert!(session.submit("두 번째").1.is_none());
    let (submit, _) = session.submit("세 번째");
    assert_eq!(submit, Submit::Replaced { dropped: "두 번째".into() });

    let next = session.complete("첫 답변입니다.").unwrap();
    let contents: Vec<&str> = next.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["첫 질문", "첫 답변입니다.", "세 번째"]);
    assert!(session.is_streaming());

    assert!(session.complete("두 번째 답변").is_none());
    assert!(!session.is_streaming());
    assert_eq!(session.history().len(), 4);
  }

  #[test]
  fn failed_reply_drops_the_unanswered_line() {
    let mut session = ChatSession::new("kim", None);
    session.submit("질문");
    assert!(session.fail().is_none());
    assert!(session.history().is_empty());
    assert!(!session.is_streaming());

    let (_, request) = session.submit("다시 질문");
    assert_eq!(request.unwrap().messages.len(), 1);
  }

  #[test]
  fn empty_reply_is_not_recorded() {
    let mut session = ChatSession::new("kim", None);
    session.submit("질문");
    session.complete("   ");
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.history()[0].role, Role::User);
  }
}
