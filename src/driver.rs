// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Completion stream driver
//
// Owns the transport for one completion, feeds each raw chunk through a
// StreamSession and delivers the resulting events to an observer, in
// order, from a single task. Sessions are independent; any number may run
// concurrently over one shared transport.
//
// Callback guarantees per session:
// - Completed: on_start, on_content* (last one final), on_done
// - Errored:   [on_start], on_content*, on_error
// - Cancelled: whatever was delivered before cancellation, then on_done
//
// Cancellation is checked before every callback. Chunks that arrive after
// it are never processed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::stream::{ContentDraft, SessionEvent, SessionState, StreamError, StreamSession};
use crate::transport::{CompletionRequest, CompletionTransport};

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receives the lifecycle of one completion.
///
/// Callbacks for one session are never invoked concurrently.
pub trait StreamObserver: Send + Sync {
    /// The first chunk arrived.
    fn on_start(&self) {}

    /// The cumulative draft grew, or became final.
    fn on_content(&self, _content: &str, _is_final: bool) {}

    /// The session failed. No other callback follows.
    fn on_error(&self, _error: &StreamError) {}

    /// The session completed or was cancelled.
    fn on_done(&self) {}
}

/// Forwards callbacks into a channel as `SessionEvent`s.
struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    fn send(&self, event: SessionEvent) {
        // Receiver gone: nobody is listening, the session still runs to its end.
        let _ = self.tx.send(event);
    }
}

impl StreamObserver for ChannelObserver {
    fn on_start(&self) {
        self.send(SessionEvent::Started);
    }

    fn on_content(&self, content: &str, is_final: bool) {
        self.send(SessionEvent::Content(ContentDraft {
            content: content.to_string(),
            is_final,
        }));
    }

    fn on_error(&self, error: &StreamError) {
        self.send(SessionEvent::Error(error.clone()));
    }

    fn on_done(&self) {
        self.send(SessionEvent::Done);
    }
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// Handle to a spawned session.
pub struct SessionHandle {
    id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Idempotent; a no-op once the session ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the session to end and return its terminal state.
    pub async fn wait(self) -> Result<SessionState, JoinError> {
        self.join.await
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Runs streaming completions over a shared transport.
#[derive(Clone)]
pub struct CompletionStreamDriver {
    transport: Arc<dyn CompletionTransport>,
}

impl CompletionStreamDriver {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self { transport }
    }

    /// Run one session to its end on the current task.
    pub async fn run(
        &self,
        request: &CompletionRequest,
        observer: &dyn StreamObserver,
        cancel: CancellationToken,
    ) -> SessionState {
        run_session(
            self.transport.as_ref(),
            request,
            observer,
            &cancel,
            Uuid::new_v4(),
        )
        .await
    }

    /// Run one session on a new task.
    pub fn spawn(
        &self,
        request: CompletionRequest,
        observer: Arc<dyn StreamObserver>,
    ) -> SessionHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let transport = self.transport.clone();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            run_session(transport.as_ref(), &request, observer.as_ref(), &token, id).await
        });

        SessionHandle { id, cancel, join }
    }

    /// Run one session on a new task and receive its events as a stream.
    ///
    /// The stream ends after the terminal event.
    pub fn spawn_stream(
        &self,
        request: CompletionRequest,
    ) -> (SessionHandle, UnboundedReceiverStream<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.spawn(request, Arc::new(ChannelObserver { tx }));
        (handle, UnboundedReceiverStream::new(rx))
    }
}

async fn run_session(
    transport: &dyn CompletionTransport,
    request: &CompletionRequest,
    observer: &dyn StreamObserver,
    cancel: &CancellationToken,
    session_id: Uuid,
) -> SessionState {
    let dispatcher = Dispatcher {
        observer,
        cancel,
        session_id,
    };
    let mut session = StreamSession::new();

    if let Err(err) = session.begin() {
        return dispatcher.deliver(&mut session, vec![SessionEvent::Error(err)])
            .unwrap_or(SessionState::Errored);
    }

    tracing::debug!(
        session_id = %session_id,
        model = %request.model,
        url = %request.endpoint.completions_url(),
        "opening completion stream"
    );

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = transport.open(request) => Some(result),
    };

    let mut chunks = match opened {
        None => return dispatcher.cancelled(&mut session),
        Some(Ok(chunks)) => chunks,
        Some(Err(err)) => {
            let events = session.fail(err);
            return dispatcher
                .deliver(&mut session, events)
                .unwrap_or(SessionState::Errored);
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return dispatcher.cancelled(&mut session),
            next = chunks.next() => next,
        };

        let events = match next {
            Some(Ok(bytes)) => match session.ingest(&bytes) {
                Ok(events) => events,
                Err(err) => {
                    tracing::error!(session_id = %session_id, error = %err, "chunk fed to finished session");
                    return session.state();
                }
            },
            Some(Err(err)) => session.fail(err),
            None => session.finish(),
        };

        if let Some(state) = dispatcher.deliver(&mut session, events) {
            tracing::info!(
                session_id = %session_id,
                model = %request.model,
                state = %state,
                frames = session.frames_seen(),
                chars = session.content().chars().count(),
                "completion stream ended"
            );
            return state;
        }

        if session.is_terminal() {
            return session.state();
        }
    }
}

/// Delivers session events to the observer, honouring cancellation.
struct Dispatcher<'a> {
    observer: &'a dyn StreamObserver,
    cancel: &'a CancellationToken,
    session_id: Uuid,
}

impl Dispatcher<'_> {
    /// Deliver `events` in order. Returns the final state once a terminal
    /// callback fired.
    fn deliver(&self, session: &mut StreamSession, events: Vec<SessionEvent>) -> Option<SessionState> {
        for event in events {
            if self.cancel.is_cancelled() {
                return Some(self.cancelled(session));
            }
            match event {
                SessionEvent::Started => self.observer.on_start(),
                SessionEvent::Content(draft) => {
                    self.observer.on_content(&draft.content, draft.is_final)
                }
                SessionEvent::Error(err) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        status = ?err.status(),
                        error = %err,
                        "completion stream failed"
                    );
                    self.observer.on_error(&err);
                    return Some(SessionState::Errored);
                }
                SessionEvent::Done => {
                    self.observer.on_done();
                    return Some(session.state());
                }
            }
        }
        None
    }

    /// Cancellation observed before the terminal callback was delivered.
    fn cancelled(&self, session: &mut StreamSession) -> SessionState {
        session.cancel();
        tracing::info!(session_id = %self.session_id, "completion stream cancelled");
        self.observer.on_done();
        SessionState::Cancelled
    }
}
