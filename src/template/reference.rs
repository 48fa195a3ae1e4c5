//! Back-references to results of earlier nodes.
//!
//! Format: `{{#nodeId}}` for the whole result, `{{#nodeId.key.subkey}}` for a
//! nested field. Array elements are addressed by index, eg. `{{#1.items.0.name}}`.
//! Resolution is a pure `parse -> lookup -> project` pipeline over a
//! [`ResultSource`] and never touches the network.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use crate::{CallflowError, Result, common::MemCache, model::NodeId};

const REFERENCE_PATTERN: &str = r"\{\{#([^.#{}\s]+)(?:\.([^{}\s]*))?\}\}";

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(REFERENCE_PATTERN).expect("reference pattern is valid"));
static WHOLE_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(&format!("^{}$", REFERENCE_PATTERN)).expect("reference pattern is valid"));

/// Read access to the results collected so far in a run.
pub trait ResultSource {
    fn result(
        &self,
        nid: &str,
    ) -> Option<Value>;
}

impl ResultSource for HashMap<NodeId, Value> {
    fn result(
        &self,
        nid: &str,
    ) -> Option<Value> {
        self.get(nid).cloned()
    }
}

impl ResultSource for MemCache<NodeId, Value> {
    fn result(
        &self,
        nid: &str,
    ) -> Option<Value> {
        self.get(&nid.to_string())
    }
}

/// A parsed `{{#id.path}}` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    /// the full `{{#...}}` text
    pub raw: &'a str,
    pub node_id: &'a str,
    /// dot path, empty for the whole result
    pub path: &'a str,
}

impl<'a> Reference<'a> {
    fn from_captures(caps: regex::Captures<'a>) -> Option<Self> {
        Some(Self {
            raw: caps.get(0)?.as_str(),
            node_id: caps.get(1)?.as_str(),
            path: caps.get(2).map(|m| m.as_str()).unwrap_or(""),
        })
    }

    /// Looks the referenced node up and projects the path out of its result.
    pub fn resolve(
        &self,
        results: &impl ResultSource,
    ) -> Result<Value> {
        let result = results
            .result(self.node_id)
            .ok_or_else(|| CallflowError::Config(format!("reference '{}': node '{}' has no stored result", self.raw, self.node_id)))?;

        project(&result, self.path)
            .cloned()
            .ok_or_else(|| CallflowError::Config(format!("reference '{}': path '{}' not found in result of node '{}'", self.raw, self.path, self.node_id)))
    }
}

/// Parses a string that consists of exactly one reference.
pub fn parse(s: &str) -> Option<Reference<'_>> {
    WHOLE_REFERENCE_RE.captures(s.trim()).and_then(Reference::from_captures)
}

/// Finds every reference embedded in a string.
pub fn find_all(s: &str) -> Vec<Reference<'_>> {
    REFERENCE_RE.captures_iter(s).filter_map(Reference::from_captures).collect()
}

pub fn contains_reference(s: &str) -> bool {
    REFERENCE_RE.is_match(s)
}

/// Reads a dot path out of a JSON value. An empty path returns the value itself.
pub fn project<'v>(
    value: &'v Value,
    path: &str,
) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Resolves a string. A string that is a single reference keeps the JSON type of
/// the referenced value, references inside longer text are interpolated.
pub fn resolve_str(
    s: &str,
    results: &impl ResultSource,
) -> Result<Value> {
    if let Some(reference) = parse(s) {
        return reference.resolve(results);
    }

    let references = find_all(s);
    if references.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    let mut resolved = s.to_string();
    for reference in references {
        let value = reference.resolve(results)?;
        resolved = resolved.replace(reference.raw, &value_to_string(&value));
    }
    Ok(Value::String(resolved))
}

/// Resolves references in a JSON value recursively.
pub fn resolve_value(
    value: &Value,
    results: &impl ResultSource,
) -> Result<Value> {
    match value {
        Value::String(s) => resolve_str(s, results),
        Value::Array(arr) => {
            let resolved: Result<Vec<Value>> = arr.iter().map(|v| resolve_value(v, results)).collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(obj) => {
            let resolved: Result<serde_json::Map<String, Value>> = obj.iter().map(|(k, v)| resolve_value(v, results).map(|rv| (k.clone(), rv))).collect();
            Ok(Value::Object(resolved?))
        }
        _ => Ok(value.clone()),
    }
}

/// Text form used for interpolation, query strings and form fields.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
