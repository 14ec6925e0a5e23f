// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads chatstream.yaml, validates model entries, resolves variable
// interpolation, and computes a deterministic config hash. Unsupported
// provider types are rejected here, before any transport is opened.

mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use interpolation::{resolve_variables, resolve_with};
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::{
    AuthScheme, Config, EndpointConfig, ModelConfig, ProviderKind, DEFAULT_OPENAI_BASE,
    DEFAULT_SYSTEM_PROMPT,
};
