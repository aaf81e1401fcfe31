//! Splitting assistant text into chat bubbles.
//!
//! A reply is shown as several short message bubbles instead of one block.
//! Boundaries are sentence terminators followed by whitespace, and line
//! breaks. A boundary is ignored when the text before it ends in a Korean
//! connective ending (`-고`, `-는데`, `-지만`, ...) or a comma, because the
//! clause continues in the next sentence. This holds for every terminator,
//! `!` and `?` included.
//!
//! The rule is a content heuristic, not a grammar: a noun that happens to end
//! in the same syllable (`최고.`) is treated as a connective too.

/// Bubbles shorter than this (in chars) are merged with a neighbour.
pub const MIN_BUBBLE_CHARS: usize = 4;

/// Endings that keep a clause open. Matching is by suffix, so `데` covers
/// `-는데` and `서` covers `-면서`.
const CONNECTIVES: &[&str] = &["고", "는", "며", "서", "데", "지만", "거나", "든지", "니까", "므로"];

fn is_terminator(c: char) -> bool {
  matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
  matches!(c, '"' | '\'' | '”' | '’' | ')' | '」' | '』' | '~')
}

fn ends_with_connective(prefix: &str) -> bool {
  let word = prefix.trim_end().trim_end_matches(is_closer);
  word.ends_with(',') || CONNECTIVES.iter().any(|s| word.ends_with(s))
}

/// Byte offset at which the first complete bubble of `buf` ends, if one is
/// already certain.
fn next_boundary(buf: &str) -> Option<usize> {
  let chars: Vec<(usize, char)> = buf.char_indices().collect();
  let mut i = 0;
  while i < chars.len() {
    let (pos, c) = chars[i];

    if c == '\n' {
      if !buf[..pos].trim().is_empty() && !ends_with_connective(&buf[..pos]) {
        return Some(pos);
      }
      i += 1;
      continue;
    }

    if is_terminator(c) {
      let mut j = i;
      while j < chars.len() && (is_terminator(chars[j].1) || is_closer(chars[j].1)) {
        j += 1;
      }
      // The run may continue in the next chunk.
      if j == chars.len() {
        return None;
      }
      if chars[j].1.is_whitespace() && !ends_with_connective(&buf[..pos]) {
        return Some(chars[j].0);
      }
      i = j;
      continue;
    }

    i += 1;
  }
  None
}

/// Incremental bubble splitter for streamed text.
///
/// Feeding the same text in any chunking yields the same bubbles as
/// [`split_bubbles`]. The most recent bubble is held back until the next one
/// is known, so a trailing short fragment can still be merged into it.
#[derive(Debug, Default)]
pub struct BubbleSplitter {
  buf:     String,
  pending: Option<String>,
  carry:   Option<String>,
}

impl BubbleSplitter {
  pub fn new() -> Self { Self::default() }

  /// Append a streamed delta and return bubbles that are now final.
  pub fn push(&mut self, delta: &str) -> Vec<String> {
    self.buf.push_str(delta);
    let mut out = Vec::new();
    loop {
      let lead = self.buf.len() - self.buf.trim_start().len();
      if lead > 0 {
        self.buf.drain(..lead);
      }
      let Some(end) = next_boundary(&self.buf) else { break };
      let bubble = self.buf[..end].trim().to_owned();
      self.buf.drain(..end);
      if !bubble.is_empty() {
        self.accept(bubble, &mut out);
      }
    }
    out
  }

  /// Flush everything that is left once the stream has ended.
  pub fn finish(&mut self) -> Vec<String> {
    let mut out = Vec::new();
    let rest = self.buf.trim().to_owned();
    self.buf.clear();
    if !rest.is_empty() {
      self.accept(rest, &mut out);
    }
    if let Some(carry) = self.carry.take() {
      match &mut self.pending {
        Some(p) => {
          p.push(' ');
          p.push_str(&carry);
        }
        None => self.pending = Some(carry),
      }
    }
    out.extend(self.pending.take());
    out
  }

  fn accept(&mut self, bubble: String, out: &mut Vec<String>) {
    let bubble = match self.carry.take() {
      Some(carry) => format!("{carry} {bubble}"),
      None => bubble,
    };

    if bubble.chars().count() < MIN_BUBBLE_CHARS {
      match &mut self.pending {
        Some(p) => {
          p.push(' ');
          p.push_str(&bubble);
        }
        None => self.carry = Some(bubble),
      }
      return;
    }

    if let Some(prev) = self.pending.replace(bubble) {
      out.push(prev);
    }
  }
}

/// Split a complete text into bubbles.
pub fn split_bubbles(text: &str) -> Vec<String> {
  let mut splitter = BubbleSplitter::new();
  let mut out = splitter.push(text);
  out.extend(splitter.finish());
  out
}
