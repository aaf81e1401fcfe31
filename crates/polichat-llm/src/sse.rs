//! Server-sent event framing for provider streams.

/// Accumulates raw bytes and hands out complete `\n\n`-terminated event
/// blocks. Bytes are only decoded once a block is complete, so a multi-byte
/// character split across chunks survives intact.
#[derive(Debug, Default)]
pub struct SseBuffer {
  buf: Vec<u8>,
}

impl SseBuffer {
  pub fn new() -> Self { Self::default() }

  pub fn push_chunk(&mut self, chunk: &[u8]) {
    self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
  }

  pub fn next_event_block(&mut self) -> Option<String> {
    let boundary = self.buf.windows(2).position(|w| w == b"\n\n")?;
    let block: Vec<u8> = self.buf.drain(..boundary + 2).collect();
    Some(String::from_utf8_lossy(&block).into_owned())
  }

  /// Whatever is left once the byte stream ended without a final blank line.
  pub fn finish(&mut self) -> Option<String> {
    let rest = std::mem::take(&mut self.buf);
    let text = String::from_utf8_lossy(&rest);
    (!text.trim().is_empty()).then(|| text.into_owned())
  }
}

/// Payloads of the `data:` lines of an event block.
pub fn data_lines(block: &str) -> Vec<&str> {
  block
    .lines()
    .filter_map(|line| line.strip_prefix("data:"))
    .map(|data| data.strip_prefix(' ').unwrap_or(data))
    .collect()
}

/// `(event, data)` pairs of an event block.
pub fn event_data_pairs(block: &str) -> Vec<(&str, &str)> {
  let mut pairs = Vec::new();
  let mut current = None;
  for line in block.lines() {
    if let Some(event) = line.strip_prefix("event:") {
      current = Some(event.trim());
    } else if let Some(data) = line.strip_prefix("data:")
      && let Some(event) = current.take()
    {
      pairs.push((event, data.trim()));
    }
  }
  pairs
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_blocks_across_chunks() {
    let mut buf = SseBuffer::new();
    buf.push_chunk(b"data: {\"a\":1}\n");
    assert!(buf.next_event_block().is_none());
    buf.push_chunk(b"\ndata: [DONE]\n\n");
    assert_eq!(buf.next_event_block().as_deref(), Some("data: {\"a\":1}\n\n"));
    assert_eq!(buf.next_event_block().as_deref(), Some("data: [DONE]\n\n"));
    assert!(buf.next_event_block().is_none());
  }

  #[test]
  fn keeps_multibyte_chars_split_between_chunks() {
    let frame = "data: 안녕\n\n".as_bytes();
    let mut buf = SseBuffer::new();
    buf.push_chunk(&frame[..8]);
    buf.push_chunk(&frame[8..]);
    let block = buf.next_event_block().unwrap();
    assert_eq!(data_lines(&block), vec!["안녕"]);
  }

  #[test]
  fn crlf_framing_is_normalised() {
    let mut buf = SseBuffer::new();
    buf.push_chunk(b"event: ping\r\ndata: {}\r\n\r\n");
    let block = buf.next_event_block().unwrap();
    assert_eq!(event_data_pairs(&block), vec![("ping", "{}")]);
  }

  #[test]
  fn pairs_events_with_data() {
    let block = "event: content_block_delta\ndata: {\"delta\":{}}\n\n";
    assert_eq!(event_data_pairs(block), vec![("content_block_delta", "{\"delta\":{}}")]);
  }

  #[test]
  fn finish_returns_unterminated_tail() {
    let mut buf = SseBuffer::new();
    buf.push_chunk(b"data: tail");
    assert_eq!(buf.finish().as_deref(), Some("data: tail"));
    assert!(buf.finish().is_none());
  }
}
