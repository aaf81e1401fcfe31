//! Single-slot send queue for chat input.
//!
//! While a reply is streaming the user may keep typing. Only the latest
//! message typed during the stream is kept; it is sent once the stream ends.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
  /// Nothing in flight; send immediately.
  SendNow(String),
  /// Parked until the current stream completes.
  Queued,
  /// Parked, replacing a message that was already waiting.
  Replaced { dropped: String },
}

#[derive(Debug, Default)]
pub struct SendQueue {
  in_flight: bool,
  slot:      Option<String>,
}

impl SendQueue {
  pub fn new() -> Self { Self::default() }

  pub fn is_streaming(&self) -> bool { self.in_flight }

  pub fn pending(&self) -> Option<&str> { self.slot.as_deref() }

  pub fn submit(&mut self, message: impl Into<String>) -> Submit {
    let message = message.into();
    if !self.in_flight {
      self.in_flight = true;
      return Submit::SendNow(message);
    }
    match self.slot.replace(message) {
      Some(dropped) => Submit::Replaced { dropped },
      None => Submit::Queued,
    }
  }

  /// Mark the in-flight stream as done. Returns the parked message, which
  /// is now itself in flight.
  pub fn complete(&mut self) -> Option<String> {
    let next = self.slot.take();
    self.in_flight = next.is_some();
    next
  }
}
