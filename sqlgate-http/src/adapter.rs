//! Event -> [`Operation`] unmarshal and result -> envelope marshal.

use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlgate_core::{Action, ApiError, ApiResult, Claims, Operation};

use crate::case::{keys_to_camel, keys_to_snake};
use crate::event::{GatewayEvent, GatewayResponse};

fn action_for_method(method: &str) -> ApiResult<Action> {
    match method {
        "GET" => Ok(Action::Read),
        "POST" => Ok(Action::Create),
        "PUT" | "PATCH" => Ok(Action::Update),
        "DELETE" => Ok(Action::Delete),
        other => Err(ApiError::BadRequest(format!(
            "unsupported method '{other}'"
        ))),
    }
}

/// Parse an inbound event into a canonical operation.
///
/// The entity is the path's last meaningful segment, ignoring a trailing
/// path-parameter value (the PK of `GET /album/5`). Query and path
/// parameters merge into `query_params`; `__`-prefixed parameters go to
/// `metadata_params` with the prefix stripped. A `POST /batch` body
/// passes through verbatim as the store params of a batch operation.
pub fn unmarshal(event: &GatewayEvent, camel_case: bool) -> ApiResult<Operation> {
    let mut action = action_for_method(&event.http_method)?;

    let segments: Vec<&str> = event.path.split('/').filter(|s| !s.is_empty()).collect();
    let empty = HashMap::new();
    let path_params = event.path_parameters.as_ref().unwrap_or(&empty);

    let entity = match segments.as_slice() {
        [] => return Err(ApiError::BadRequest("no entity in path".into())),
        [.., parent, last] if path_params.values().any(|v| v == last) => parent,
        [.., last] => last,
    };

    if *entity == "batch" {
        if action != Action::Create {
            return Err(ApiError::BadRequest(
                "batch requests must be POSTed".into(),
            ));
        }
        action = Action::Batch;
    }

    let mut query_params = Map::new();
    let mut metadata_params = HashMap::new();
    if let Some(raw) = &event.query_string_parameters {
        for (key, value) in raw {
            match key.strip_prefix("__") {
                Some(meta) => {
                    metadata_params.insert(meta.to_string(), value.clone());
                }
                None => {
                    query_params.insert(key.clone(), Value::String(value.clone()));
                }
            }
        }
    }
    for (key, value) in path_params {
        query_params.insert(key.clone(), Value::String(value.clone()));
    }

    let store_params = match &event.body {
        None => Map::new(),
        Some(body) if body.trim().is_empty() => Map::new(),
        Some(body) => {
            let decoded: Value = serde_json::from_str(body)
                .map_err(|e| ApiError::BadRequest(format!("body is not valid JSON: {e}")))?;
            let decoded = if camel_case {
                keys_to_snake(decoded)
            } else {
                decoded
            };
            match decoded {
                Value::Object(map) => map,
                _ => {
                    return Err(ApiError::BadRequest(
                        "body must be a JSON object".into(),
                    ))
                }
            }
        }
    };

    let claims = event
        .request_context
        .authorizer
        .as_ref()
        .map(Claims::from_authorizer)
        .unwrap_or_default();

    let mut operation = Operation::new(*entity, action)
        .with_claims(claims)
        .with_query_params(query_params)
        .with_store_params(store_params);
    operation.metadata_params = metadata_params;
    Ok(operation)
}

/// Shape a handler result or error into the response envelope.
pub fn marshal(result: ApiResult<Value>, camel_case: bool) -> GatewayResponse {
    let headers: HashMap<String, String> =
        [("Content-Type".to_string(), "application/json".to_string())].into();

    match result {
        Ok(value) => {
            let value = if camel_case { keys_to_camel(value) } else { value };
            GatewayResponse {
                is_base64_encoded: false,
                status_code: 200,
                headers,
                body: value.to_string(),
            }
        }
        Err(err) => {
            if err.status_code() >= 500 {
                tracing::error!(error = %err, "request failed");
            }
            let body = serde_json::json!({ "error": err.public_message() });
            GatewayResponse {
                is_base64_encoded: false,
                status_code: err.status_code(),
                headers,
                body: body.to_string(),
            }
        }
    }
}
