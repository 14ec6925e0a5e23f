// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Frame splitter
//
// Turns raw chunks into complete SSE frames. Chunks arrive with no
// alignment to frame boundaries, so the trailing partial block (and any
// partial UTF-8 sequence) is carried over to the next call.

use super::types::Frame;

/// UTF-8 byte-order mark. Ignored once at the start of a body.
pub(super) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Splits a chunked SSE body into frames.
///
/// Each call appends to the carry-over buffer and returns every frame that
/// is now terminated by a blank line. Frames come out in arrival order.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    /// Text received but not yet terminated by a blank line.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending_bytes: Vec<u8>,
    /// Offset in `buffer` where the next terminator search starts.
    scan_from: usize,
    /// Some text was received (a leading BOM is only stripped before that).
    started: bool,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and return all frames completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        let chunk = if self.started {
            chunk
        } else {
            self.started = !chunk.is_empty();
            chunk.strip_prefix('\u{feff}').unwrap_or(chunk)
        };
        self.buffer.push_str(chunk);
        self.drain_blocks()
    }

    /// Feed a raw byte chunk.
    ///
    /// A multi-byte character split across chunks is held back until its
    /// remaining bytes arrive. Invalid sequences become U+FFFD.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let text = self.decode_utf8(chunk);
        self.feed(&text)
    }

    /// End of stream: treat whatever is left as a final block.
    pub fn flush(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.pending_bytes.is_empty() {
            let tail = std::mem::take(&mut self.pending_bytes);
            frames.extend(self.feed(&String::from_utf8_lossy(&tail)));
        }
        let rest = std::mem::take(&mut self.buffer);
        self.scan_from = 0;
        frames.extend(parse_block(&rest));
        frames
    }

    /// True if data is buffered that has not produced a frame yet.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.pending_bytes.is_empty()
    }

    fn drain_blocks(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut from = self.scan_from;
        while let Some((pos, len)) = find_terminator(self.buffer.as_bytes(), from) {
            if let Some(frame) = parse_block(&self.buffer[consumed..pos]) {
                frames.push(frame);
            }
            consumed = pos + len;
            from = consumed;
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        // A terminator may straddle the next chunk: rescan the last 3 bytes.
        self.scan_from = self.buffer.len().saturating_sub(3);
        frames
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending_bytes.len());
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(prefix) = std::str::from_utf8(&self.pending_bytes[..valid]) {
                        out.push_str(prefix);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.pending_bytes.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Earliest `\n\n` or `\r\n\r\n` at or after `from`. Returns (offset, length).
fn find_terminator(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < bytes.len() {
        match bytes[i] {
            b'\n' if bytes[i + 1] == b'\n' => return Some((i, 2)),
            b'\r' if bytes[i..].starts_with(b"\r\n\r\n") => return Some((i, 4)),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parse one SSE block into a frame.
///
/// SSE format:
/// ```text
/// event: <event_type>\n
/// data: <payload>\n
/// \n
/// ```
///
/// Lines that do not start with `data:` or `event:` are skipped, as are
/// `:` comments and indented lines.
/// Several `data:` lines are joined with newlines. A block without any
/// `data:` line yields `None`.
pub fn parse_block(block: &str) -> Option<Frame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        } else if let Some(ev) = line.strip_prefix("event:") {
            event = Some(ev.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(Frame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Detect whether a response body looks like an SSE stream.
///
/// SSE streams start with lines like `data:`, `event:` or a `:` comment.
/// Non-SSE bodies (a JSON error object, a non-streaming completion) start
/// with `{`. A leading byte-order mark is skipped. Returns `None` while
/// only whitespace (or part of a BOM) has been seen.
pub fn looks_like_event_stream(first_bytes: &[u8]) -> Option<bool> {
    if first_bytes.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(first_bytes) {
        return None;
    }
    let body = first_bytes.strip_prefix(UTF8_BOM).unwrap_or(first_bytes);
    let first = body.iter().find(|b| !b.is_ascii_whitespace())?;
    Some(*first != b'{' && *first != b'[')
}
