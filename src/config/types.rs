// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

use super::error::ConfigError;

/// Base URL used for `openai` models without an explicit `base`.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// System prompt used when the config does not set one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated chatstream config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model used when the caller does not pick one. Always a key of `models`.
    pub default_model: String,
    pub system_prompt: String,
    /// Models keyed by display name.
    pub models: BTreeMap<String, ModelConfig>,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

impl Config {
    /// Look up a model by name, or the default model for `None`.
    pub fn model(&self, name: Option<&str>) -> Result<&ModelConfig, ConfigError> {
        let name = name.unwrap_or(&self.default_model);
        self.models.get(name).ok_or_else(|| ConfigError::UnknownModel {
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Models and endpoints
// ---------------------------------------------------------------------------

/// One selectable model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Display name (the key in `models`).
    pub name: String,
    /// Model id sent to the API.
    pub api_model: String,
    pub endpoint: EndpointConfig,
}

/// Wire-compatible provider families. Anything else is rejected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// api.openai.com (or a compatible base URL) with bearer auth.
    OpenAi,
    /// Self-hosted or proxied chat completions endpoint.
    Custom,
}

/// How the API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    BearerToken,
    /// `api-key: <key>`
    ApiKeyHeader,
    None,
}

/// Everything needed to reach one completion endpoint.
///
/// Passed explicitly with every request; there is no process-wide client.
#[derive(Clone, PartialEq)]
pub struct EndpointConfig {
    pub kind: ProviderKind,
    /// Base URL without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub auth: AuthScheme,
    /// Sent as the `api-version` query parameter (custom endpoints only).
    pub api_version: Option<String>,
    /// Limit on the time to receive response headers.
    pub timeout_ms: Option<u64>,
}

impl EndpointConfig {
    /// OpenAI endpoint with bearer auth.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            api_key: Some(api_key.into()),
            auth: AuthScheme::BearerToken,
            api_version: None,
            timeout_ms: None,
        }
    }

    /// Custom endpoint without authentication.
    pub fn custom(base_url: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Custom,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            auth: AuthScheme::None,
            api_version: None,
            timeout_ms: None,
        }
    }

    /// Full chat completions URL.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth", &self.auth)
            .field("api_version", &self.api_version)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
