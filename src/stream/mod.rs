// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Incremental completion ingestion
//
// Responsibilities:
// - Split raw chunks into `data:` frames, carrying partial frames over
// - Decode each frame into a delta, an in-band provider error, or done
// - Accumulate deltas into a growing draft; emit one final draft on done
// - Drive the Idle -> Connecting -> Streaming -> terminal state machine
//
// Transport-agnostic: callers feed bytes in, events come out.

mod accumulator;
mod decoder;
mod session;
mod splitter;
mod types;

pub use accumulator::DraftAccumulator;
pub use decoder::{decode, decode_payload, extract_error_message, extract_text, DONE_SENTINEL};
pub use session::StreamSession;
pub use splitter::{looks_like_event_stream, parse_block, FrameSplitter};
pub use types::{
    ContentDraft, DecodedEvent, Frame, SessionEvent, SessionState, StreamError,
    MALFORMED_PAYLOAD_PREVIEW,
};

#[cfg(test)]
mod tests;
