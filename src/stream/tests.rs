// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Tests for the streaming session: splitter -> decoder -> accumulator.
//
// Tests cover:
//  1. Drafts grow in order, then one final draft
//  2. [DONE] alone yields an empty final draft
//  3. Chunk-boundary invariance (whole payload vs byte-by-byte)
//  4. Malformed frame -> exactly one error, nothing after
//  5. Provider error after content -> partial content not retracted
//  6. Frames after [DONE] in the same chunk are discarded
//  7. End of stream without [DONE]
//  8. Cancellation and terminal-state contract
//  9. Plain JSON bodies (error object, non-streaming completion)
// 10. Leading UTF-8 byte-order mark

use super::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn delta_frame(text: &str) -> String {
    let payload = serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    });
    format!("data: {payload}\n\n")
}

fn done_frame() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Feed each chunk into a fresh session and collect every event.
fn run_chunks<I, C>(chunks: I) -> (StreamSession, Vec<SessionEvent>)
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut session = StreamSession::new();
    session.begin().unwrap();
    let mut events = Vec::new();
    for chunk in chunks {
        if session.is_terminal() {
            break;
        }
        events.extend(session.ingest(chunk.as_ref()).unwrap());
    }
    (session, events)
}

/// Drafts only, as (content, is_final) pairs.
fn drafts(events: &[SessionEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Content(d) => Some((d.content.clone(), d.is_final)),
            _ => None,
        })
        .collect()
}

fn errors(events: &[SessionEvent]) -> Vec<StreamError> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Test 1: Drafts grow in order, then one final draft
// ---------------------------------------------------------------------------

#[test]
fn hello_scenario_produces_expected_drafts() {
    let (session, events) = run_chunks([
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#.to_string() + "\n\n",
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#.to_string() + "\n\n",
        done_frame(),
    ]);

    assert_eq!(
        drafts(&events),
        vec![
            ("Hel".to_string(), false),
            ("Hello".to_string(), false),
            ("Hello".to_string(), true),
        ]
    );
    assert_eq!(events.first(), Some(&SessionEvent::Started));
    assert_eq!(events.last(), Some(&SessionEvent::Done));
    assert_eq!(session.state(), SessionState::Completed);
}

#[test]
fn n_frames_yield_n_partials_then_one_final() {
    let words = ["The", " quick", " brown", " fox", " jumps"];
    let mut chunks: Vec<String> = words.iter().map(|w| delta_frame(w)).collect();
    chunks.push(done_frame());

    let (_, events) = run_chunks(chunks);
    let drafts = drafts(&events);

    assert_eq!(drafts.len(), words.len() + 1);
    assert!(drafts[..words.len()].iter().all(|(_, is_final)| !is_final));
    assert!(drafts.windows(2).all(|w| w[0].0.len() <= w[1].0.len()));
    assert_eq!(drafts.last().unwrap(), &("The quick brown fox jumps".to_string(), true));
}

#[test]
fn role_only_and_empty_deltas_emit_nothing() {
    let (_, events) = run_chunks([
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#.to_string() + "\n\n",
        delta_frame(""),
        delta_frame("Hi"),
        r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#.to_string() + "\n\n",
        done_frame(),
    ]);
    assert_eq!(
        drafts(&events),
        vec![("Hi".to_string(), false), ("Hi".to_string(), true)]
    );
}

// ---------------------------------------------------------------------------
// Test 2: [DONE] alone
// ---------------------------------------------------------------------------

#[test]
fn done_alone_yields_empty_final_draft() {
    let (session, events) = run_chunks([done_frame()]);
    assert_eq!(drafts(&events), vec![(String::new(), true)]);
    assert_eq!(
        events,
        vec![
            SessionEvent::Started,
            SessionEvent::Content(ContentDraft::finished("")),
            SessionEvent::Done,
        ]
    );
    assert_eq!(session.state(), SessionState::Completed);
}

// ---------------------------------------------------------------------------
// Test 3: Chunk-boundary invariance
// ---------------------------------------------------------------------------

#[test]
fn byte_by_byte_matches_whole_payload() {
    let payload = [
        delta_frame("Grüße, "),
        delta_frame("世界 "),
        delta_frame("🎉"),
        done_frame(),
    ]
    .concat();
    let bytes = payload.as_bytes();

    let (_, whole) = run_chunks([bytes]);
    let (_, split) = run_chunks(bytes.chunks(1));

    assert_eq!(drafts(&whole), drafts(&split));
    assert_eq!(drafts(&split).last().unwrap(), &("Grüße, 世界 🎉".to_string(), true));
}

#[test]
fn arbitrary_chunk_sizes_give_identical_drafts() {
    let payload = [
        delta_frame("alpha "),
        delta_frame("beta "),
        delta_frame("gamma"),
        done_frame(),
    ]
    .concat();
    let bytes = payload.as_bytes();
    let (_, expected) = run_chunks([bytes]);

    for size in [2, 3, 7, 13, 64] {
        let (_, events) = run_chunks(bytes.chunks(size));
        assert_eq!(drafts(&events), drafts(&expected), "chunk size {size}");
    }
}

// ---------------------------------------------------------------------------
// Test 4: Malformed frame
// ---------------------------------------------------------------------------

#[test]
fn malformed_frame_yields_one_error_and_stops() {
    let chunk = [
        delta_frame("ok"),
        "data: {this is not json\n\n".to_string(),
        delta_frame("ignored"),
        done_frame(),
    ]
    .concat();

    let (session, events) = run_chunks([chunk]);

    assert_eq!(drafts(&events), vec![("ok".to_string(), false)]);
    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StreamError::MalformedFrame { .. }));
    assert!(matches!(events.last(), Some(SessionEvent::Error(_))));
    assert_eq!(session.state(), SessionState::Errored);
}

// ---------------------------------------------------------------------------
// Test 5: Provider error after content
// ---------------------------------------------------------------------------

#[test]
fn provider_error_after_content_keeps_partial_drafts() {
    let (session, events) = run_chunks([
        delta_frame("partial "),
        delta_frame("answer"),
        r#"data: {"error":{"message":"The server had an error while processing your request.","type":"server_error"}}"#
            .to_string()
            + "\n\n",
        done_frame(),
    ]);

    assert_eq!(
        drafts(&events),
        vec![
            ("partial ".to_string(), false),
            ("partial answer".to_string(), false),
        ]
    );
    assert_eq!(
        errors(&events),
        vec![StreamError::Provider {
            message: "The server had an error while processing your request.".into()
        }]
    );
    assert_eq!(session.state(), SessionState::Errored);
    assert_eq!(session.content(), "partial answer");
}

// ---------------------------------------------------------------------------
// Test 6: Nothing after a terminal event
// ---------------------------------------------------------------------------

#[test]
fn frames_after_done_in_same_chunk_are_discarded() {
    let chunk = [delta_frame("a"), done_frame(), delta_frame("b")].concat();
    let (session, events) = run_chunks([chunk]);

    assert_eq!(
        drafts(&events),
        vec![("a".to_string(), false), ("a".to_string(), true)]
    );
    assert_eq!(session.frames_seen(), 2);
}

#[test]
fn ingest_after_terminal_is_a_contract_violation() {
    let (mut session, _) = run_chunks([done_frame()]);
    let err = session.ingest(delta_frame("late").as_bytes()).unwrap_err();
    assert_eq!(
        err,
        StreamError::SessionAlreadyTerminal {
            state: SessionState::Completed
        }
    );
    assert!(session.begin().is_err());
}

// ---------------------------------------------------------------------------
// Test 7: End of stream
// ---------------------------------------------------------------------------

#[test]
fn unterminated_done_completes_on_finish() {
    let (mut session, mut events) = run_chunks([delta_frame("x") + "data: [DONE]"]);
    events.extend(session.finish());

    assert_eq!(
        drafts(&events),
        vec![("x".to_string(), false), ("x".to_string(), true)]
    );
    assert_eq!(session.state(), SessionState::Completed);
}

#[test]
fn stream_closed_without_done_is_a_transport_error() {
    let (mut session, mut events) = run_chunks([delta_frame("x")]);
    events.extend(session.finish());

    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StreamError::Transport { status: None, .. }));
    assert_eq!(session.state(), SessionState::Errored);
}

#[test]
fn finish_after_terminal_is_silent() {
    let (mut session, _) = run_chunks([done_frame()]);
    assert!(session.finish().is_empty());
    assert!(session.fail(StreamError::transport("late")).is_empty());
}

// ---------------------------------------------------------------------------
// Test 8: Cancellation and transport failure
// ---------------------------------------------------------------------------

#[test]
fn cancel_yields_done_once() {
    let (mut session, _) = run_chunks([delta_frame("x")]);
    assert_eq!(session.cancel(), vec![SessionEvent::Done]);
    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(session.cancel().is_empty());
    assert!(session.ingest(done_frame().as_bytes()).is_err());
}

#[test]
fn cancel_while_connecting() {
    let mut session = StreamSession::new();
    session.begin().unwrap();
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(session.cancel(), vec![SessionEvent::Done]);
}

#[test]
fn transport_failure_yields_single_error() {
    let mut session = StreamSession::new();
    session.begin().unwrap();
    let events = session.fail(StreamError::Transport {
        status: Some(401),
        message: "Incorrect API key provided".into(),
    });
    assert_eq!(events.len(), 1);
    assert_eq!(session.state(), SessionState::Errored);
    assert_eq!(errors(&events)[0].status(), Some(401));
}

// ---------------------------------------------------------------------------
// Test 9: Plain JSON bodies
// ---------------------------------------------------------------------------

#[test]
fn json_error_body_is_a_provider_error() {
    let body = br#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
    let (mut session, mut events) = run_chunks(body.chunks(10));
    events.extend(session.finish());

    assert!(drafts(&events).is_empty());
    assert_eq!(
        errors(&events),
        vec![StreamError::Provider {
            message: "You exceeded your current quota".into()
        }]
    );
}

#[test]
fn non_streaming_body_yields_single_final_draft() {
    let body = br#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Whole answer"}}],"usage":{"total_tokens":12}}"#;
    let (mut session, mut events) = run_chunks([&body[..]]);
    events.extend(session.finish());

    assert_eq!(drafts(&events), vec![("Whole answer".to_string(), true)]);
    assert_eq!(events.last(), Some(&SessionEvent::Done));
}

#[test]
fn truncated_json_body_is_malformed() {
    let (mut session, mut events) = run_chunks([&b"{\"choices\":["[..]]);
    events.extend(session.finish());
    assert!(matches!(
        errors(&events)[..],
        [StreamError::MalformedFrame { .. }]
    ));
}

// ---------------------------------------------------------------------------
// Test 10: Leading UTF-8 byte-order mark
// ---------------------------------------------------------------------------

const BOM: &[u8] = b"\xEF\xBB\xBF";

fn with_bom(body: &[u8]) -> Vec<u8> {
    [BOM, body].concat()
}

#[test]
fn bom_before_event_stream_keeps_first_frame() {
    let payload = [delta_frame("Hel"), delta_frame("lo"), done_frame()].concat();
    let body = with_bom(payload.as_bytes());

    let (_, events) = run_chunks([&body[..]]);
    assert_eq!(
        drafts(&events),
        vec![
            ("Hel".to_string(), false),
            ("Hello".to_string(), false),
            ("Hello".to_string(), true),
        ]
    );

    // The mark itself may arrive split across chunks.
    let (_, split) = run_chunks(body.chunks(1));
    assert_eq!(drafts(&split), drafts(&events));
}

#[test]
fn bom_before_json_error_body_keeps_provider_message() {
    let body = with_bom(br#"{"error":{"message":"quota"}}"#);

    for size in [1, 2, 5, body.len()] {
        let (mut session, mut events) = run_chunks(body.chunks(size));
        events.extend(session.finish());
        assert_eq!(
            errors(&events),
            vec![StreamError::Provider {
                message: "quota".into()
            }],
            "chunk size {size}"
        );
    }
}

#[test]
fn bom_is_only_stripped_at_the_start() {
    let mut body = delta_frame("a").into_bytes();
    body.extend_from_slice(BOM);
    body.extend_from_slice(delta_frame("b").as_bytes());
    body.extend_from_slice(done_frame().as_bytes());

    // A mark in the middle is ordinary text, so the line is not `data:`.
    let (_, events) = run_chunks([&body[..]]);
    assert_eq!(
        drafts(&events),
        vec![("a".to_string(), false), ("a".to_string(), true)]
    );
}
