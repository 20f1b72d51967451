//! Server-Sent Events framing
//!
//! The gateway writes a `retry:` preamble followed by one `data:` frame per
//! accepted reading. `SseDecoder` is the client half used by the dashboard.

use crate::domain::types::{Reading, ReadingPayload};
use bytes::Bytes;
use tracing::warn;

/// Longest line the decoder buffers before dropping it
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reconnect hint sent once at the start of a stream
pub fn retry_preamble(retry_ms: u64) -> Bytes {
    Bytes::from(format!("retry: {retry_ms}\n\n"))
}

/// One `data:` frame carrying the reading as JSON
pub fn encode_event(reading: &Reading) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(&ReadingPayload::from(reading))?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// Incremental parser for an SSE byte stream
///
/// Collects `data:` lines until a blank line ends the event. Comments, `event:`,
/// `id:` fields are ignored; `retry:` is exposed via `retry_ms`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
    retry_ms: Option<u64>,
    /// Set while skipping the rest of an oversized line
    discarding: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `retry:` value seen on the stream
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    /// Feed a chunk; returns the data payloads of every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_ref(), ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "retry" => {
                    if let Ok(ms) = value.trim().parse() {
                        self.retry_ms = Some(ms);
                    }
                }
                _ => {}
            }
        }

        if self.buf.len() > MAX_LINE_BYTES {
            warn!(buffered = %self.buf.len(), "sse_line_too_long: dropping event");
            self.buf.clear();
            self.data.clear();
            self.discarding = true;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Measurements, SourceId};

    #[test]
    fn test_encode_event_frame() {
        let reading = Reading::new(
            Some(SourceId::from("dev-1")),
            Measurements::new(22.5, 650.0, 40.0),
            1000,
        );
        let frame = encode_event(&reading).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));

        let payload: ReadingPayload =
            serde_json::from_str(text.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(payload.co2, 650.0);
        assert_eq!(payload.device_id.as_deref(), Some("dev-1"));
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"retry: 1000\n\nda").is_empty());
        assert_eq!(decoder.retry_ms(), Some(1000));
        assert!(decoder.push(b"ta: {\"co2\":1}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), vec!["{\"co2\":1}".to_string()]);
    }

    #[test]
    fn test_decoder_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\r\n\r\ndata: a\r\ndata: b\r\n\r\ndata: c\n\n");
        assert_eq!(events, vec!["a\nb".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_decoder_drops_oversized_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: first\ndata: ").is_empty());
        let filler = vec![b'x'; 16 * 1024];
        for _ in 0..8 {
            assert!(decoder.push(&filler).is_empty());
            assert!(decoder.buf.len() <= MAX_LINE_BYTES);
        }

        // The tail of the long line and its event are skipped; the stream recovers
        assert_eq!(decoder.push(b"xxxx\n\ndata: ok\n\n"), vec!["ok".to_string()]);
    }
}
