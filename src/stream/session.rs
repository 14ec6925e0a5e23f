// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Stream session
//
// Synchronous state machine for one completion:
//   Idle -> Connecting -> Streaming -> {Completed | Errored | Cancelled}
//
// Each raw chunk runs splitter -> decoder -> accumulator to completion and
// yields the events to deliver, in order. No I/O happens here; the async
// driver owns the transport and calls into this type.

use super::accumulator::DraftAccumulator;
use super::decoder::{decode, extract_error_message, extract_text};
use super::splitter::{looks_like_event_stream, FrameSplitter, UTF8_BOM};
use super::types::{DecodedEvent, Frame, SessionEvent, SessionState, StreamError};

/// Body format, decided from the first non-whitespace byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Unknown,
    EventStream,
    /// A plain JSON body: an error object, or a non-streaming completion.
    Json,
}

/// Accumulation state for one streaming completion.
#[derive(Debug)]
pub struct StreamSession {
    state: SessionState,
    format: BodyFormat,
    splitter: FrameSplitter,
    accumulator: DraftAccumulator,
    /// Raw bytes held back while the format is undecided; the whole body
    /// in JSON mode.
    body: Vec<u8>,
    frames_seen: usize,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            format: BodyFormat::Unknown,
            splitter: FrameSplitter::new(),
            accumulator: DraftAccumulator::new(),
            body: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Draft text accumulated so far.
    pub fn content(&self) -> &str {
        self.accumulator.content()
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// Request issued: `Idle -> Connecting`.
    pub fn begin(&mut self) -> Result<(), StreamError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            state if state.is_terminal() => Err(StreamError::SessionAlreadyTerminal { state }),
            _ => Ok(()),
        }
    }

    /// Process one raw chunk.
    ///
    /// The first chunk moves the session to `Streaming` and yields
    /// `Started`. Processing stops at the first terminal event; frames
    /// after it are discarded.
    pub fn ingest(&mut self, chunk: &[u8]) -> Result<Vec<SessionEvent>, StreamError> {
        if self.state.is_terminal() {
            return Err(StreamError::SessionAlreadyTerminal { state: self.state });
        }

        let mut events = Vec::new();
        if matches!(self.state, SessionState::Idle | SessionState::Connecting) {
            self.state = SessionState::Streaming;
            events.push(SessionEvent::Started);
        }

        let held;
        let chunk = match self.format {
            BodyFormat::Json => {
                self.body.extend_from_slice(chunk);
                return Ok(events);
            }
            BodyFormat::EventStream => chunk,
            BodyFormat::Unknown => {
                self.body.extend_from_slice(chunk);
                match looks_like_event_stream(&self.body) {
                    Some(true) => self.format = BodyFormat::EventStream,
                    Some(false) => self.format = BodyFormat::Json,
                    None => {}
                }
                if self.format != BodyFormat::EventStream {
                    return Ok(events);
                }
                held = std::mem::take(&mut self.body);
                &held[..]
            }
        };

        for frame in self.splitter.feed_bytes(chunk) {
            self.apply_frame(&frame, &mut events);
            if self.state.is_terminal() {
                break;
            }
        }

        Ok(events)
    }

    /// The transport reported end of stream.
    ///
    /// A trailing unterminated frame is still processed. If the stream did
    /// not complete, the session errors with a transport error.
    pub fn finish(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state.is_terminal() {
            return events;
        }

        match self.format {
            BodyFormat::Json => self.finish_json(&mut events),
            BodyFormat::EventStream | BodyFormat::Unknown => {
                let held = std::mem::take(&mut self.body);
                let mut frames = self.splitter.feed_bytes(&held);
                frames.extend(self.splitter.flush());
                for frame in frames {
                    self.apply_frame(&frame, &mut events);
                    if self.state.is_terminal() {
                        break;
                    }
                }
            }
        }

        if !self.state.is_terminal() {
            self.errored(
                StreamError::transport("stream closed before completion"),
                &mut events,
            );
        }
        events
    }

    /// The transport failed. Yields a single error event unless already
    /// terminal.
    pub fn fail(&mut self, error: StreamError) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !self.state.is_terminal() {
            self.errored(error, &mut events);
        }
        events
    }

    /// Caller-initiated cancellation. Yields `Done` unless already terminal.
    pub fn cancel(&mut self) -> Vec<SessionEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = SessionState::Cancelled;
        vec![SessionEvent::Done]
    }

    fn apply_frame(&mut self, frame: &Frame, events: &mut Vec<SessionEvent>) {
        self.frames_seen += 1;
        match decode(frame) {
            Ok(decoded) => self.apply_event(decoded, events),
            Err(err) => self.errored(err, events),
        }
    }

    fn apply_event(&mut self, decoded: DecodedEvent, events: &mut Vec<SessionEvent>) {
        let provider_message = match &decoded {
            DecodedEvent::Error(message) => Some(message.clone()),
            _ => None,
        };

        let draft = match self.accumulator.apply(decoded) {
            Ok(draft) => draft,
            Err(err) => {
                debug_assert!(false, "accumulator terminal while session is live: {err}");
                self.errored(err, events);
                return;
            }
        };

        if let Some(message) = provider_message {
            self.errored(StreamError::Provider { message }, events);
            return;
        }

        if let Some(draft) = draft {
            let is_final = draft.is_final;
            events.push(SessionEvent::Content(draft));
            if is_final {
                self.state = SessionState::Completed;
                events.push(SessionEvent::Done);
            }
        }
    }

    fn finish_json(&mut self, events: &mut Vec<SessionEvent>) {
        let held = std::mem::take(&mut self.body);
        let body = held.strip_prefix(UTF8_BOM).unwrap_or(&held);
        let json: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                let text = String::from_utf8_lossy(body);
                self.errored(StreamError::malformed(e, text.trim()), events);
                return;
            }
        };

        if let Some(message) = extract_error_message(&json) {
            self.apply_event(DecodedEvent::Error(message), events);
            return;
        }

        // A whole completion in one body: one final draft, no partials.
        let text = extract_text(&json).to_string();
        let mut discarded = Vec::new();
        self.apply_event(DecodedEvent::Delta(text), &mut discarded);
        self.apply_event(DecodedEvent::Done, events);
    }

    fn errored(&mut self, error: StreamError, events: &mut Vec<SessionEvent>) {
        self.state = SessionState::Errored;
        events.push(SessionEvent::Error(error));
    }
}
