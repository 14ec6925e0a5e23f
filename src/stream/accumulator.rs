// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use super::types::{ContentDraft, DecodedEvent, SessionState, StreamError};

/// Merges decoded fragments into a running draft.
///
/// Emits a non-final draft for every non-empty delta and exactly one final
/// draft on `Done`. After `Done` or `Error` the accumulator is terminal and
/// refuses further events.
#[derive(Debug, Default)]
pub struct DraftAccumulator {
    buffer: String,
    terminal: Option<SessionState>,
}

impl DraftAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: DecodedEvent) -> Result<Option<ContentDraft>, StreamError> {
        if let Some(state) = self.terminal {
            return Err(StreamError::SessionAlreadyTerminal { state });
        }

        match event {
            DecodedEvent::Delta(text) if text.is_empty() => Ok(None),
            DecodedEvent::Delta(text) => {
                self.buffer.push_str(&text);
                Ok(Some(ContentDraft::partial(self.buffer.clone())))
            }
            DecodedEvent::Done => {
                self.terminal = Some(SessionState::Completed);
                Ok(Some(ContentDraft::finished(self.buffer.clone())))
            }
            // Errors are reported by the session, not as a draft.
            DecodedEvent::Error(_) => {
                self.terminal = Some(SessionState::Errored);
                Ok(None)
            }
        }
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}
