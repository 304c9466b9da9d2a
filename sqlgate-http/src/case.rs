//! Deep key case conversion, applied strictly at the gateway boundary.
//! Internal maps are always snake_case to match column names.

use convert_case::{Case, Casing};
use serde_json::Value;

fn convert_keys(value: Value, case: Case) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_case(case), convert_keys(v, case)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| convert_keys(v, case)).collect())
        }
        other => other,
    }
}

/// Inbound bodies: camelCase keys become snake_case.
pub fn keys_to_snake(value: Value) -> Value {
    convert_keys(value, Case::Snake)
}

/// Outbound bodies: snake_case keys become camelCase.
pub fn keys_to_camel(value: Value) -> Value {
    convert_keys(value, Case::Camel)
}
