// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolve `${VAR}` and `${VAR:-fallback}` references from the process
/// environment.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

/// Resolve references against an arbitrary lookup.
///
/// A variable that is unset (or set to an empty string when a fallback is
/// given) takes the fallback; without a fallback it is an error. An
/// unterminated `${` is kept literally.
pub fn resolve_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let expr = &after[..end];
        let (name, fallback) = match expr.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (expr, None),
        };

        if name.is_empty() {
            result.push_str(&rest[start..start + 2 + end + 1]);
        } else {
            let value = match (lookup(name), fallback) {
                (Some(v), Some(fb)) if v.is_empty() => fb.to_string(),
                (Some(v), _) => v,
                (None, Some(fb)) => fb.to_string(),
                (None, None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            };
            result.push_str(&value);
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
