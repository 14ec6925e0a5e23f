// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

/// Config loading and validation failures. All of them are raised before
/// any request is sent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Validation(String),

    #[error("model \"{model}\" uses unsupported provider type \"{kind}\" (expected \"openai\" or \"custom\")")]
    UnsupportedProvider { model: String, kind: String },

    #[error("no model named \"{name}\" in config")]
    UnknownModel { name: String },

    #[error("${{{name}}} is not set in the environment")]
    UndefinedVariable { name: String },
}
