//! `$ref:op_id.path` substitution in batch parameter trees.
//!
//! A string that *is* a single reference token is replaced by the
//! referenced value with its type preserved; a reference embedded in
//! longer text interpolates the value's string form. References may only
//! point at previously completed operations.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlgate_core::{ApiError, ApiResult};

use crate::request::OperationRecord;

static REF_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$ref:([A-Za-z_][A-Za-z0-9_-]*)((?:\.[A-Za-z0-9_]+)*)").expect("ref token pattern")
});

/// All operation ids referenced anywhere in the value tree.
pub fn referenced_ids(value: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    collect_ids(value, &mut ids);
    ids
}

fn collect_ids(value: &Value, ids: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for capture in REF_TOKEN.captures_iter(s) {
                ids.insert(capture[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, ids)),
        Value::Object(map) => map.values().for_each(|v| collect_ids(v, ids)),
        _ => {}
    }
}

/// Substitute every reference in a parameter map, producing a new tree.
pub fn resolve_params(
    params: &Map<String, Value>,
    results: &BTreeMap<String, OperationRecord>,
) -> ApiResult<Map<String, Value>> {
    let mut resolved = Map::new();
    for (key, value) in params {
        resolved.insert(key.clone(), resolve_value(value, results)?);
    }
    Ok(resolved)
}

fn resolve_value(
    value: &Value,
    results: &BTreeMap<String, OperationRecord>,
) -> ApiResult<Value> {
    match value {
        Value::String(s) => {
            // A whole-string token keeps the referenced value's type.
            if let Some(capture) = REF_TOKEN.captures(s) {
                if let Some(full) = capture.get(0) {
                    if full.start() == 0 && full.end() == s.len() {
                        return lookup(&capture[1], &capture[2], results);
                    }
                }
            }
            if !REF_TOKEN.is_match(s) {
                return Ok(value.clone());
            }
            // Embedded tokens interpolate their string form.
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for capture in REF_TOKEN.captures_iter(s) {
                let Some(token) = capture.get(0) else { continue };
                out.push_str(&s[last..token.start()]);
                let resolved = lookup(&capture[1], &capture[2], results)?;
                out.push_str(&stringify(&resolved));
                last = token.end();
            }
            out.push_str(&s[last..]);
            Ok(Value::String(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, results))
                .collect::<ApiResult<_>>()?,
        )),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, nested) in map {
                out.insert(key.clone(), resolve_value(nested, results)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(value.clone()),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn lookup(
    id: &str,
    raw_path: &str,
    results: &BTreeMap<String, OperationRecord>,
) -> ApiResult<Value> {
    let data = match results.get(id) {
        Some(OperationRecord::Completed { data }) => data,
        _ => {
            return Err(ApiError::BadRequest(format!(
                "unknown or failed reference '{id}'"
            )))
        }
    };

    let mut current = data;
    let mut walked = String::new();
    for segment in raw_path.split('.').filter(|s| !s.is_empty()) {
        current = descend(current, segment).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "missing key '{segment}' at '$ref:{id}{walked}'; available keys: [{}]",
                available_keys(current).join(", ")
            ))
        })?;
        walked.push('.');
        walked.push_str(segment);
    }
    Ok(current.clone())
}

fn descend<'v>(current: &'v Value, segment: &str) -> Option<&'v Value> {
    match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                items.get(index)
            } else if items.len() == 1 {
                // Handler results are row lists; a field reference into a
                // single-row result descends through the row.
                descend(&items[0], segment)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn available_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}
