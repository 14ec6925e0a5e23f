// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Frame decoder
//
// Interprets one frame of a chat completions stream:
// - `data: [DONE]` -> Done
// - `data: {"error":{"message":"..."}}` -> Error
// - `data: {"choices":[{"delta":{"content":"Hello"}}]}` -> Delta("Hello")
// - `data: {"choices":[{"delta":{"role":"assistant"}}]}` -> Delta("")

use super::types::{DecodedEvent, Frame, StreamError};

/// Stream terminator payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Decode a single frame.
///
/// Fails with `MalformedFrame` when the payload is neither the done
/// sentinel nor JSON.
pub fn decode(frame: &Frame) -> Result<DecodedEvent, StreamError> {
    decode_payload(&frame.data)
}

/// Decode a raw `data:` payload.
pub fn decode_payload(payload: &str) -> Result<DecodedEvent, StreamError> {
    let data = payload.trim();

    if data == DONE_SENTINEL {
        return Ok(DecodedEvent::Done);
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| StreamError::malformed(e, data))?;

    if let Some(message) = extract_error_message(&json) {
        return Ok(DecodedEvent::Error(message));
    }

    Ok(DecodedEvent::Delta(extract_text(&json).to_string()))
}

/// Pull a provider error message out of a response object.
///
/// Accepts `{"error":{"message":"..."}}`, `{"error":"..."}`, and falls back
/// to the JSON text of any other non-null `error` value.
pub fn extract_error_message(json: &serde_json::Value) -> Option<String> {
    let error = json.get("error")?;
    match error {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => Some(
            obj.get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| error.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Text fragment of the first choice.
///
/// Checks `delta.content` (streaming), then `message.content`
/// (non-streaming), then `text` (legacy completions). Missing or null
/// content is an empty fragment.
pub fn extract_text(json: &serde_json::Value) -> &str {
    let Some(choice) = json.get("choices").and_then(|c| c.get(0)) else {
        return "";
    };

    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
        })
        .or_else(|| choice.get("text").and_then(|t| t.as_str()))
        .unwrap_or("")
}
