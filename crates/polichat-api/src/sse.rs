//! Relay a provider text stream to the browser as server-sent events.
//!
//! Frames are `{"text": ...}` per delta, `{"error": ...}` if the upstream
//! fails part-way, and a final `[DONE]`.

use std::{convert::Infallible, future::Future};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt as _};
use polichat_llm::TextStream;
use serde_json::json;
use tracing::warn;

pub const DONE: &str = "[DONE]";

pub fn text_event(text: &str) -> Event { Event::default().data(json!({ "text": text }).to_string()) }

pub fn error_event(message: &str) -> Event {
  Event::default().data(json!({ "error": message }).to_string())
}

/// Forward `upstream` and run `on_complete` with the full text once it ends
/// without error. A client that disconnects early never reaches completion.
pub fn relay<F, Fut>(
  mut upstream: TextStream,
  on_complete: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
  F: FnOnce(String) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send,
{
  let events = async_stream::stream! {
    let mut full = String::new();
    let mut failed = false;
    while let Some(item) = upstream.next().await {
      match item {
        Ok(text) => {
          full.push_str(&text);
          yield Ok(text_event(&text));
        }
        Err(e) => {
          warn!(error = %e, "upstream stream failed");
          yield Ok(error_event(&e.to_string()));
          failed = true;
          break;
        }
      }
    }
    if !failed {
      on_complete(full).await;
    }
    yield Ok(Event::default().data(DONE));
  };
  Sse::new(events).keep_alive(KeepAlive::default())
}

/// [`relay`] without a completion hook.
pub fn relay_plain(upstream: TextStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
  relay(upstream, |_| async {})
}
