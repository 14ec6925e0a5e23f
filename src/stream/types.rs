// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Core types for completion streaming: frames, decoded events, content
// drafts, and errors.

use std::fmt;

// ---------------------------------------------------------------------------
// SSE frame representation
// ---------------------------------------------------------------------------

/// One `data:` unit extracted from the stream.
///
/// A frame is everything between two blank lines. Providers using the
/// chat completions format send a single `data:` line per frame; an
/// optional `event:` line is recorded but not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The SSE event type, if the block carried one.
    pub event: Option<String>,
    /// The payload (everything after `data: `). Multiple data lines are
    /// joined with `\n`.
    pub data: String,
}

impl Frame {
    /// Build a plain data frame without an event type.
    pub fn data(payload: impl Into<String>) -> Self {
        Self {
            event: None,
            data: payload.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoded events
// ---------------------------------------------------------------------------

/// The meaning of a single frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// `data: [DONE]`: the completion is finished.
    Done,
    /// Incremental text. May be empty for role-only or keepalive deltas.
    Delta(String),
    /// The provider reported an error in-band.
    Error(String),
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

/// The cumulative assistant text produced so far for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDraft {
    pub content: String,
    /// True once `[DONE]` was seen. No drafts follow a final one.
    pub is_final: bool,
}

impl ContentDraft {
    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_final: false,
        }
    }

    pub fn finished(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_final: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of a streaming completion.
///
/// `Completed`, `Errored` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Errored | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What a session reports to its observer, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The first chunk arrived.
    Started,
    /// The draft grew, or became final.
    Content(ContentDraft),
    /// The session failed. Always the last event of an errored session.
    Error(StreamError),
    /// The session completed or was cancelled.
    Done,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Maximum payload characters copied into a `MalformedFrame` error.
pub const MALFORMED_PAYLOAD_PREVIEW: usize = 120;

/// Errors that can occur while streaming a completion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// Payload is neither `[DONE]` nor valid JSON.
    #[error("malformed frame: {reason} (payload: {payload})")]
    MalformedFrame { reason: String, payload: String },

    /// The provider sent an error body in the stream.
    #[error("{message}")]
    Provider { message: String },

    /// Network failure, non-success status, or premature end of stream.
    #[error("{}", transport_message(.status, .message))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// A terminal session was fed again. Indicates a driver bug.
    #[error("session already terminal ({state})")]
    SessionAlreadyTerminal { state: SessionState },
}

fn transport_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("transport error (status {code}): {message}"),
        None => format!("transport error: {message}"),
    }
}

impl StreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        StreamError::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl fmt::Display, payload: &str) -> Self {
        let payload = match payload.char_indices().nth(MALFORMED_PAYLOAD_PREVIEW) {
            Some((idx, _)) => format!("{}...", &payload[..idx]),
            None => payload.to_string(),
        };
        StreamError::MalformedFrame {
            reason: reason.to_string(),
            payload,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
