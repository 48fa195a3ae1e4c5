//! `{name}` placeholders in interface paths.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use crate::{
    CallflowError, Result,
    template::reference::{self, ResultSource},
};

/// Format: `/jobs/{jobId}/status`. Back-references (`{{#...}}`) never match.
const PLACEHOLDER_PATTERN: &str = r"\{([A-Za-z_][A-Za-z0-9_\-]*)\}";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"));

/// Placeholder names in order of appearance, without duplicates.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        if let Some(name) = caps.get(1).map(|m| m.as_str())
            && !names.contains(&name)
        {
            names.push(name);
        }
    }
    names
}

/// Substitutes every `{name}` with `raw_params[name]`, following back-references
/// the same way parameter values do.
pub fn process_url_template(
    template: &str,
    raw_params: &HashMap<String, Value>,
    results: &impl ResultSource,
) -> Result<String> {
    let mut resolved = template.to_string();

    for name in placeholders(template) {
        let raw = raw_params
            .get(name)
            .ok_or_else(|| CallflowError::Config(format!("url placeholder '{{{}}}' in '{}' has no parameter", name, template)))?;

        let value = match raw {
            Value::String(s) if reference::contains_reference(s) => reference::resolve_str(s, results)?,
            other => other.clone(),
        };

        if matches!(value, Value::Null | Value::Object(_) | Value::Array(_)) {
            return Err(CallflowError::Config(format!("url placeholder '{{{}}}' resolved to non-scalar value {}", name, value)));
        }

        resolved = resolved.replace(&format!("{{{}}}", name), &reference::value_to_string(&value));
    }

    Ok(resolved)
}
