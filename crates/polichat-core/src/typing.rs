//! Simulated typing delay for bubbles.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

pub const MIN_TYPING: Duration = Duration::from_millis(400);
pub const MAX_TYPING: Duration = Duration::from_secs(6);

const SENTENCE_PAUSE_MS: u64 = 250;
const COMMA_PAUSE_MS: u64 = 120;

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TypingSpeed {
  Slow,
  #[default]
  Normal,
  Fast,
}

impl TypingSpeed {
  pub fn per_char(self) -> Duration {
    match self {
      TypingSpeed::Slow => Duration::from_millis(70),
      TypingSpeed::Normal => Duration::from_millis(40),
      TypingSpeed::Fast => Duration::from_millis(20),
    }
  }
}

/// How long the "typing…" indicator stays up before `bubble` appears.
pub fn typing_delay(bubble: &str, speed: TypingSpeed) -> Duration {
  let mut ms = 0u64;
  let per_char = speed.per_char().as_millis() as u64;
  for c in bubble.chars() {
    if c.is_whitespace() {
      continue;
    }
    ms += per_char;
    match c {
      '.' | '!' | '?' | '…' => ms += SENTENCE_PAUSE_MS,
      ',' => ms += COMMA_PAUSE_MS,
      _ => {}
    }
  }
  Duration::from_millis(ms).clamp(MIN_TYPING, MAX_TYPING)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_text_is_clamped_to_minimum() {
    assert_eq!(typing_delay("네", TypingSpeed::Fast), MIN_TYPING);
  }

  #[test]
  fn long_text_is_clamped_to_maximum() {
    let text = "가".repeat(500);
    assert_eq!(typing_delay(&text, TypingSpeed::Slow), MAX_TYPING);
  }

  #[test]
  fn punctuation_adds_pauses() {
    // 10 chars at 40ms + one terminator pause.
    let d = typing_delay("가나다라마바사아자.", TypingSpeed::Normal);
    assert_eq!(d, Duration::from_millis(10 * 40 + 250));
    assert!(typing_delay("abcdefghij", TypingSpeed::Slow) > typing_delay("abcdefghij", TypingSpeed::Fast));
  }
}
