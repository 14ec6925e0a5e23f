// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Transport adapters
//
// Responsibilities:
// - Build the chat completions request from an explicit EndpointConfig
// - Open a streaming request and hand raw body chunks to the driver
// - Map non-success statuses to transport errors, preferring the
//   provider's own error message
// - Non-streaming completion (used for chat titles)
//
// Cancellation: dropping the returned ChunkStream closes the connection.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;

use crate::config::{AuthScheme, EndpointConfig, ModelConfig, ProviderKind};
use crate::message::ChatMessage;
use crate::stream::{extract_error_message, extract_text, SessionEvent, StreamError, StreamSession};

/// Maximum characters of a non-JSON error body kept in the error message.
const ERROR_BODY_PREVIEW: usize = 200;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Raw body chunks as they arrive, with no frame alignment.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// One chat completion request, self-contained.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub endpoint: EndpointConfig,
    /// Model id sent on the wire.
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    pub fn new(model: &ModelConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            endpoint: model.endpoint.clone(),
            model: model.api_model.clone(),
            messages,
        }
    }

    /// JSON request body.
    pub fn body(&self, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": self.messages,
            "stream": stream,
        })
    }
}

/// Result of a non-streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    /// `usage.total_tokens`, when the provider reports it.
    pub total_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Trait: CompletionTransport (dependency injection point)
// ---------------------------------------------------------------------------

/// Delivers raw completion bytes over time.
///
/// Implementations must be Send + Sync so one transport can serve many
/// concurrent sessions via `Arc`.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Issue a streaming request. Errors here are connection or status
    /// failures; in-stream failures arrive as `Err` items.
    async fn open(&self, request: &CompletionRequest) -> Result<ChunkStream, StreamError>;

    /// Non-streaming completion.
    ///
    /// The default drains `open` through a `StreamSession` and returns the
    /// final draft. Usage is not available that way.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, StreamError> {
        let mut chunks = self.open(request).await?;
        let mut session = StreamSession::new();
        session.begin()?;

        while let Some(chunk) = chunks.next().await {
            let events = match chunk {
                Ok(bytes) => session.ingest(&bytes)?,
                Err(err) => session.fail(err),
            };
            if let Some(result) = completion_from_events(events) {
                return result;
            }
        }

        completion_from_events(session.finish())
            .unwrap_or_else(|| Err(StreamError::transport("stream closed before completion")))
    }
}

/// The final draft or error among `events`, if any.
fn completion_from_events(events: Vec<SessionEvent>) -> Option<Result<Completion, StreamError>> {
    events.into_iter().find_map(|event| match event {
        SessionEvent::Content(draft) if draft.is_final => Some(Ok(Completion {
            content: draft.content,
            total_tokens: None,
        })),
        SessionEvent::Error(err) => Some(Err(err)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Reqwest transport (server-side HTTP stream adapter)
// ---------------------------------------------------------------------------

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let endpoint = &request.endpoint;
        let mut req = self
            .client
            .post(endpoint.completions_url())
            .json(&request.body(stream));

        if endpoint.kind == ProviderKind::Custom {
            if let Some(version) = &endpoint.api_version {
                req = req.query(&[("api-version", version)]);
            }
        }

        if let Some(key) = &endpoint.api_key {
            req = match endpoint.auth {
                AuthScheme::BearerToken => req.bearer_auth(key),
                AuthScheme::ApiKeyHeader => req.header("api-key", key),
                AuthScheme::None => req,
            };
        }

        if stream {
            req = req.header(ACCEPT, "text/event-stream");
        }
        req
    }

    /// Send and wait for response headers. Non-success statuses become
    /// `Transport` errors carrying the status.
    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, StreamError> {
        let pending = self.build(request, stream).send();

        let result = match request.endpoint.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), pending)
                .await
                .map_err(|_| StreamError::transport(format!("no response within {ms} ms")))?,
            None => pending.await,
        };

        let resp = result.map_err(|e| StreamError::transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                url = %request.endpoint.completions_url(),
                "completion request rejected"
            );
            return Err(error_from_status(status, &body));
        }

        Ok(resp)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl CompletionTransport for ReqwestTransport {
    async fn open(&self, request: &CompletionRequest) -> Result<ChunkStream, StreamError> {
        let resp = self.send(request, true).await?;
        let stream = resp
            .bytes_stream()
            .map_err(|e| StreamError::transport(e.to_string()));
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, StreamError> {
        let resp = self.send(request, false).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| StreamError::transport(e.to_string()))?;

        let json: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| StreamError::malformed(e, &String::from_utf8_lossy(&body)))?;

        if let Some(message) = extract_error_message(&json) {
            return Err(StreamError::Provider { message });
        }

        Ok(Completion {
            content: extract_text(&json).to_string(),
            total_tokens: json
                .get("usage")
                .and_then(|u| u.get("total_tokens"))
                .and_then(|t| t.as_u64()),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a transport error for a non-success response.
///
/// Uses the provider's `error.message` when the body carries one, then the
/// raw body text, then the canonical reason phrase.
pub fn error_from_status(status: reqwest::StatusCode, body: &[u8]) -> StreamError {
    let provider_message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| extract_error_message(&json));

    let message = provider_message.unwrap_or_else(|| {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        if text.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            text.chars().take(ERROR_BODY_PREVIEW).collect()
        }
    });

    StreamError::Transport {
        status: Some(status.as_u16()),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use reqwest::StatusCode;

    fn request() -> CompletionRequest {
        CompletionRequest {
            endpoint: EndpointConfig::openai("sk-test"),
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        }
    }

    #[test]
    fn body_shape() {
        let body = request().body(true);
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true
            })
        );
        assert_eq!(request().body(false)["stream"], false);
    }

    #[test]
    fn status_error_prefers_provider_message() {
        let body = br#"{"error":{"message":"Incorrect API key provided: sk-test.","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let err = error_from_status(StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            err,
            StreamError::Transport {
                status: Some(401),
                message: "Incorrect API key provided: sk-test.".into()
            }
        );
    }

    #[test]
    fn status_error_falls_back_to_body_text() {
        let err = error_from_status(StatusCode::BAD_GATEWAY, b"<html>upstream down</html>");
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn status_error_with_empty_body_uses_reason() {
        let err = error_from_status(StatusCode::TOO_MANY_REQUESTS, b"");
        assert_eq!(
            err,
            StreamError::Transport {
                status: Some(429),
                message: "Too Many Requests".into()
            }
        );
    }

    struct ScriptedTransport {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn open(&self, _request: &CompletionRequest) -> Result<ChunkStream, StreamError> {
            let items: Vec<Result<Bytes, StreamError>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    #[tokio::test]
    async fn default_complete_drains_the_stream() {
        let transport = ScriptedTransport {
            chunks: vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Short \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"title\"}}]}\n\ndata: [DONE]\n\n",
            ],
        };
        let completion = transport.complete(&request()).await.unwrap();
        assert_eq!(
            completion,
            Completion {
                content: "Short title".into(),
                total_tokens: None
            }
        );
    }

    #[tokio::test]
    async fn default_complete_surfaces_provider_error() {
        let transport = ScriptedTransport {
            chunks: vec!["data: {\"error\":{\"message\":\"overloaded\"}}\n\n"],
        };
        let err = transport.complete(&request()).await.unwrap_err();
        assert_eq!(
            err,
            StreamError::Provider {
                message: "overloaded".into()
            }
        );
    }

    #[tokio::test]
    async fn default_complete_without_done_is_an_error() {
        let transport = ScriptedTransport {
            chunks: vec!["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"],
        };
        let err = transport.complete(&request()).await.unwrap_err();
        assert!(matches!(err, StreamError::Transport { status: None, .. }));
    }
}
