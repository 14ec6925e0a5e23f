// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs: provider and auth names are
// free-form strings here and get validated, interpolated and mapped onto
// closed enums by the loader.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub models: BTreeMap<String, RawModelConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModelConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Model id sent on the wire. Defaults to the map key.
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base: Option<String>,
    pub auth: Option<String>,
    pub api_version: Option<String>,
    pub timeout_ms: Option<u64>,
}
