//! Push-stream (SSE) parser
//!
//! Parses the wire format into raw [`Frame`]s. Decoding of the payload into
//! typed events is left to the [`mapper`](crate::mapper).

use bytes::Bytes;
use metasys_core::Frame;
use tracing::trace;

use super::types::{StreamError, StreamResult};

/// Push-stream parser state
#[derive(Debug, Default)]
pub struct SseParser {
    /// Buffer for incomplete lines
    buffer: Vec<u8>,
    /// Frame being accumulated
    current: Frame,
    /// Data lines of the current frame
    data_lines: Vec<String>,
}

impl SseParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and extract any complete frames
    ///
    /// A line that isn't valid UTF-8 yields an `Err` entry and is skipped;
    /// parsing continues with the next line.
    pub fn feed(&mut self, bytes: Bytes) -> Vec<StreamResult<Frame>> {
        let mut frames = Vec::new();

        self.buffer.extend_from_slice(&bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            let line = &line[..line.len() - 1];

            // Handle \r\n line endings
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Whether a partially received frame or line is buffered
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || !self.current.is_empty() || !self.data_lines.is_empty()
    }

    /// Drop any partial frame, returning whether one was discarded
    pub fn reset(&mut self) -> bool {
        let had_partial = self.has_partial();
        self.buffer.clear();
        self.current = Frame::default();
        self.data_lines.clear();
        had_partial
    }

    /// Process a single line
    fn process_line(&mut self, line: &[u8]) -> Option<StreamResult<Frame>> {
        // Empty line signals end of frame
        if line.is_empty() {
            return self.dispatch_frame().map(Ok);
        }

        let line_str = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                return Some(Err(StreamError::Parse(
                    "Invalid UTF-8 in stream line".into(),
                )));
            }
        };

        // Comment line (keepalive)
        if let Some(comment) = line_str.strip_prefix(':') {
            trace!("Stream comment");
            self.current.comment = Some(comment.strip_prefix(' ').unwrap_or(comment).to_string());
            return None;
        }

        // Split on first colon
        let (field, value) = if let Some(colon_pos) = line_str.find(':') {
            let (f, v) = line_str.split_at(colon_pos);
            // Skip the colon and optional leading space
            let v = &v[1..];
            let v = v.strip_prefix(' ').unwrap_or(v);
            (f, v)
        } else {
            // Field with no value
            (line_str, "")
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.current.event = Some(value.to_string()),
            "id" => {
                // Ids containing NUL are ignored per the SSE rules
                if !value.contains('\0') {
                    self.current.id = Some(value.to_string());
                }
            }
            "retry" => match value.parse::<u64>() {
                Ok(ms) => self.current.retry = Some(ms),
                Err(_) => trace!("Ignoring non-numeric retry: {}", value),
            },
            _ => {
                // Unknown field, ignored
                trace!("Stream unknown field: {}", field);
            }
        }

        None
    }

    /// Dispatch the accumulated frame, if anything was accumulated
    fn dispatch_frame(&mut self) -> Option<Frame> {
        let mut frame = std::mem::take(&mut self.current);
        if !self.data_lines.is_empty() {
            frame.data = Some(std::mem::take(&mut self.data_lines).join("\n"));
        }

        if frame.is_empty() {
            None
        } else {
            Some(frame)
        }
    }
}
