//! Event-stream decoder.
//!
//! Splits the response body on line boundaries, accumulates `data:` lines
//! into a frame and parses the frame as one JSON envelope when a blank line
//! terminates it. One decoder per connection: a dropped connection drops any
//! partially received line or frame with it.

use idlenotify_protocol::{Envelope, StreamEvent};
use tracing::{debug, warn};

const DATA_PREFIX: &[u8] = b"data:";

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it.
    ///
    /// Bytes after the last line terminator stay buffered until the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.handle_line(&line) {
                events.push(event);
            }
        }
        self.line.extend_from_slice(rest);
        events
    }

    fn handle_line(&mut self, line: &[u8]) -> Option<StreamEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let frame = std::mem::take(&mut self.data);
            return parse_frame(&frame);
        }

        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
        if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            self.data.push_str(String::from_utf8_lossy(rest).trim());
        }
        None
    }
}

fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let envelope: Envelope = match serde_json::from_str(frame) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(
                component = "sse",
                event = "sse.malformed_frame",
                error = %err,
                frame_len = frame.len(),
                "Discarding malformed event frame"
            );
            return None;
        }
    };

    let event_type = envelope.payload.event_type.clone();
    match StreamEvent::from_envelope(envelope) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            debug!(
                component = "sse",
                event = "sse.ignored",
                event_type = %event_type,
                "Ignoring event"
            );
            None
        }
        Err(err) => {
            warn!(
                component = "sse",
                event = "sse.invalid_event",
                event_type = %event_type,
                error = %err,
                "Discarding event with unexpected shape"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use idlenotify_protocol::SessionStatus;

    use super::*;

    const IDLE_FRAME: &str = "data: {\"directory\":\"/p\",\"payload\":{\"type\":\"session.status\",\"properties\":{\"sessionID\":\"s1\",\"status\":{\"type\":\"idle\"}}}}\n\n";

    fn status_frame(session: &str, status: &str) -> String {
        format!(
            "data: {{\"directory\":\"/p\",\"payload\":{{\"type\":\"session.status\",\"properties\":{{\"sessionID\":\"{session}\",\"status\":{{\"type\":\"{status}\"}}}}}}}}\n\n"
        )
    }

    #[test]
    fn decodes_single_frame() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(IDLE_FRAME.as_bytes());
        assert_eq!(
            events,
            vec![StreamEvent::SessionStatus {
                directory: "/p".to_string(),
                session_id: "s1".to_string(),
                status: SessionStatus::Idle,
            }]
        );
    }

    #[test]
    fn frame_split_across_chunks_waits_for_terminator() {
        let mut decoder = SseDecoder::new();
        let bytes = IDLE_FRAME.as_bytes();
        let (a, b) = bytes.split_at(25);
        let (b, c) = b.split_at(b.len() - 1);

        assert!(decoder.push(a).is_empty());
        assert!(decoder.push(b).is_empty());
        assert_eq!(decoder.push(c).len(), 1);
    }

    #[test]
    fn byte_at_a_time_feeding_still_decodes() {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for byte in status_frame("s2", "busy").as_bytes() {
            events.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id(), "s2");
    }

    #[test]
    fn crlf_lines_and_multiple_frames_per_chunk() {
        let mut decoder = SseDecoder::new();
        let chunk = format!("{}{}", status_frame("a", "busy"), status_frame("b", "idle"))
            .replace('\n', "\r\n");
        let events = decoder.push(chunk.as_bytes());
        let ids: Vec<&str> = events.iter().map(StreamEvent::session_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn multi_line_data_is_concatenated() {
        let mut decoder = SseDecoder::new();
        let chunk = "data: {\"directory\":\"/p\",\n\
                     data: \"payload\":{\"type\":\"session.status\",\"properties\":{\"sessionID\":\"s1\",\"status\":{\"type\":\"busy\"}}}}\n\n";
        let events = decoder.push(chunk.as_bytes());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn malformed_frames_are_skipped_without_breaking_the_stream() {
        let mut decoder = SseDecoder::new();
        let chunk = format!(
            "data: {{not json\n\n\
             data: {{\"directory\":\"/p\"}}\n\n\
             : keepalive comment\n\n\
             event: message\nid: 7\n{}",
            status_frame("s3", "idle")
        );
        let events = decoder.push(chunk.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id(), "s3");
    }

    #[test]
    fn ignored_types_produce_nothing() {
        let mut decoder = SseDecoder::new();
        let chunk = "data: {\"directory\":\"/p\",\"payload\":{\"type\":\"server.connected\",\"properties\":{}}}\n\n";
        assert!(decoder.push(chunk.as_bytes()).is_empty());
    }
}
