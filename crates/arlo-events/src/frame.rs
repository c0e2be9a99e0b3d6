//! Push stream framing
//!
//! The subscription body is a sequence of frames separated by a blank line.
//! Each frame is `field: value` lines; the `data` field carries JSON.
//! Frames that do not parse are dropped.

use serde_json::Value;
use tracing::{debug, warn};

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Event id used to resume after a reconnect
    pub id: Option<String>,
    /// Event type; absent means `message`
    pub event: Option<String>,
    /// Decoded `data` payload
    pub data: Value,
}

impl StreamEvent {
    /// Whether this is an ordinary message event
    pub fn is_message(&self) -> bool {
        self.event.as_deref().map_or(true, |kind| kind == "message")
    }
}

/// Largest frame buffered while waiting for its delimiter
pub const MAX_FRAME_LEN: usize = 1 << 20;

// longest delimiter minus one; a delimiter may straddle two chunks
const DELIMITER_OVERLAP: usize = 3;

/// Incremental splitter turning body chunks into frames
///
/// A frame that outgrows the buffer cap is dropped whole: its bytes are
/// discarded up to the next delimiter and decoding resumes after it.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
    max_frame_len: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// Decoder capped at [`MAX_FRAME_LEN`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that drops frames longer than `max_frame_len` bytes
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame_len,
            discarding: false,
        }
    }

    /// Append a chunk and return every complete frame it finished
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            let from = self.scanned.saturating_sub(DELIMITER_OVERLAP);
            let Some((end, delimiter)) = find_delimiter(&self.buffer, from) else {
                self.scanned = self.buffer.len();
                break;
            };
            let frame: Vec<u8> = self.buffer.drain(..end + delimiter).take(end).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                debug!(tail = frame.len(), "skipped the rest of an oversized frame");
                continue;
            }
            let text = String::from_utf8_lossy(&frame);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(event) = parse_frame(text) {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_frame_len {
            warn!(
                buffered = self.buffer.len(),
                max = self.max_frame_len,
                "frame exceeds the buffer cap, dropping it"
            );
            let keep = self.buffer.len().min(DELIMITER_OVERLAP);
            self.buffer.drain(..self.buffer.len() - keep);
            self.scanned = self.buffer.len();
            self.discarding = true;
        }
        events
    }

    /// Bytes received but not yet terminated by a blank line
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Position and length of the earliest blank-line delimiter at or after `from`
fn find_delimiter(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

/// Parse one frame's `field: value` lines
pub fn parse_frame(text: &str) -> Option<StreamEvent> {
    let mut id = None;
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match field.trim() {
            "id" => id = Some(value.to_string()),
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        debug!(frame = text, "dropping frame without data");
        return None;
    }

    match serde_json::from_str(&data.join("\n")) {
        Ok(data) => Some(StreamEvent { id, event, data }),
        Err(e) => {
            debug!(error = %e, frame = text, "dropping frame with malformed data");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fields() {
        let event = parse_frame("id: 42\nevent: message\ndata: {\"transId\":\"web!1\"}").unwrap();
        assert_eq!(event.id.as_deref(), Some("42"));
        assert!(event.is_message());
        assert_eq!(event.data, json!({"transId": "web!1"}));
    }

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"id: 1\r\ndata: {\"st").is_empty());
        let events = decoder.push(b"atus\":\"connected\"}\r\n\r\nid: 2\ndata: {}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, json!({"status": "connected"}));
        assert_eq!(events[1].id.as_deref(), Some("2"));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data: {not json\n\n: keepalive\n\nid: 3\ndata: [1]\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, json!([1]));
    }

    #[test]
    fn non_message_events_are_flagged() {
        let event = parse_frame("event: logout\ndata: {}").unwrap();
        assert!(!event.is_message());
    }

    #[test]
    fn delimiter_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: [1]\r\n\r").is_empty());
        assert_eq!(decoder.push(b"\n").len(), 1);
        assert!(decoder.push(b"data: [2]\n").is_empty());
        assert_eq!(decoder.push(b"\ndata: [3]\n\n").len(), 2);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn byte_at_a_time_input_still_frames() {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in b"id: 1\ndata: {\"a\":1}\n\nid: 2\ndata: {\"b\":2}\r\n\r\n" {
            events.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, json!({"b": 2}));
    }

    #[test]
    fn oversized_frame_is_dropped_and_decoding_resumes() {
        let mut decoder = FrameDecoder::with_max_frame_len(32);
        let events = decoder.push(b"data: [1]\n\ndata: {\"big\":\"");
        assert_eq!(events.len(), 1);

        assert!(decoder.push(&[b'x'; 64]).is_empty());
        assert!(decoder.pending_len() <= 32);
        assert!(decoder.push(&[b'x'; 64]).is_empty());
        assert!(decoder.pending_len() <= 32);

        let events = decoder.push(b"\"}\n\ndata: [2]\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, json!([2]));
        assert_eq!(decoder.pending_len(), 0);
    }
}
