//! SSE (Server-Sent Events) frame decoding
//!
//! Shared by the generation client and the HTTP tool transports. Bytes are
//! buffered raw until a full line is available, so neither a line nor a
//! multi-byte character can be torn across network chunks.

use tracing::trace;

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Incremental decoder for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes after the last complete line
    partial: Vec<u8>,
    /// Fields of the frame being assembled
    event: Option<String>,
    data: Vec<String>,
    /// Frames dispatched so far
    frames: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.partial.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Dispatch whatever is pending once the body has ended
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    pub fn frames_dispatched(&self) -> usize {
        self.frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => trace!("SSE: ignoring field {}", field),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        self.frames += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: None,
                data: "{\"a\":1}".to_string()
            }]
        );
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: endpo").is_empty());
        assert!(decoder.push(b"int\ndata: /messages?session").is_empty());
        let frames = decoder.push(b"=42\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("endpoint"));
        assert_eq!(frames[0].data, "/messages?session=42");
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let body = "data: héllo\n\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&body[..split]).is_empty());
        let frames = decoder.push(&body[split..]);
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keepalive\r\ndata: one\r\ndata: two\r\n\r\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "one\ntwo");
        assert_eq!(frames[1].data, "[DONE]");
        assert_eq!(decoder.frames_dispatched(), 2);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.data, "tail");
        assert!(decoder.finish().is_none());
    }
}
