// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a chatstream config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Map provider type and auth onto closed enums (unsupported -> error)
/// 5. Resolve variable interpolation in string fields
/// 6. Check the default model and per-endpoint requirements
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.models.is_empty() {
        return Err(ConfigError::Validation(
            "at least one model must be configured under \"models\"".to_string(),
        ));
    }

    let mut models = BTreeMap::new();
    for (name, raw_model) in raw.models {
        let model = build_model_config(&name, raw_model)?;
        models.insert(name, model);
    }

    let default_model = match raw.default_model {
        Some(name) => {
            let name = resolve_variables(&name)?;
            if !models.contains_key(&name) {
                return Err(ConfigError::Validation(format!(
                    "default_model \"{name}\" is not defined under \"models\""
                )));
            }
            name
        }
        // BTreeMap order: the alphabetically first model.
        None => models.keys().next().cloned().unwrap_or_default(),
    };

    let system_prompt = match raw.system_prompt {
        Some(prompt) => resolve_variables(&prompt)?,
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    Ok(Config {
        default_model,
        system_prompt,
        models,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_model_config(name: &str, raw: raw::RawModelConfig) -> Result<ModelConfig, ConfigError> {
    let kind = parse_provider_kind(name, &raw.kind)?;

    let api_key = raw
        .api_key
        .as_deref()
        .map(resolve_variables)
        .transpose()?
        .filter(|k| !k.is_empty());

    let base_url = match (&raw.base, kind) {
        (Some(base), _) => resolve_variables(base)?,
        (None, ProviderKind::OpenAi) => DEFAULT_OPENAI_BASE.to_string(),
        (None, ProviderKind::Custom) => {
            return Err(ConfigError::Validation(format!(
                "model \"{name}\": custom endpoints require \"base\""
            )));
        }
    };
    let base_url = base_url.trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "model \"{name}\": base \"{base_url}\" must be an http(s) URL"
        )));
    }

    let auth = match (kind, raw.auth.as_deref()) {
        (ProviderKind::OpenAi, None | Some("bearer-token")) => AuthScheme::BearerToken,
        (ProviderKind::OpenAi, Some(other)) => {
            return Err(ConfigError::Validation(format!(
                "model \"{name}\": openai models only support \"bearer-token\" auth, got \"{other}\""
            )));
        }
        (ProviderKind::Custom, None | Some("bearer-token")) => AuthScheme::BearerToken,
        (ProviderKind::Custom, Some("api-key")) => AuthScheme::ApiKeyHeader,
        (ProviderKind::Custom, Some("none")) => AuthScheme::None,
        (ProviderKind::Custom, Some(other)) => {
            return Err(ConfigError::Validation(format!(
                "model \"{name}\": unknown auth \"{other}\", expected \"bearer-token\", \"api-key\", or \"none\""
            )));
        }
    };

    if auth != AuthScheme::None && api_key.is_none() {
        return Err(ConfigError::Validation(format!(
            "model \"{name}\": api_key is required for {} auth",
            match auth {
                AuthScheme::ApiKeyHeader => "api-key",
                _ => "bearer-token",
            }
        )));
    }

    let api_version = match (&raw.api_version, kind) {
        (Some(_), ProviderKind::OpenAi) => {
            return Err(ConfigError::Validation(format!(
                "model \"{name}\": api_version is only valid for custom endpoints"
            )));
        }
        (Some(v), ProviderKind::Custom) => Some(resolve_variables(v)?),
        (None, _) => None,
    };

    if raw.timeout_ms == Some(0) {
        return Err(ConfigError::Validation(format!(
            "model \"{name}\": timeout_ms must be greater than zero"
        )));
    }

    let api_model = match raw.model {
        Some(m) => resolve_variables(&m)?,
        None => name.to_string(),
    };

    Ok(ModelConfig {
        name: name.to_string(),
        api_model,
        endpoint: EndpointConfig {
            kind,
            base_url,
            api_key,
            auth,
            api_version,
            timeout_ms: raw.timeout_ms,
        },
    })
}

fn parse_provider_kind(model: &str, kind: &str) -> Result<ProviderKind, ConfigError> {
    match kind {
        "openai" => Ok(ProviderKind::OpenAi),
        "custom" => Ok(ProviderKind::Custom),
        other => Err(ConfigError::UnsupportedProvider {
            model: model.to_string(),
            kind: other.to_string(),
        }),
    }
}
