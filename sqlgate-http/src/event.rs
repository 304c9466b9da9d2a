use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound gateway envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayEvent {
    pub http_method: String,
    pub path: String,
    pub query_string_parameters: Option<HashMap<String, String>>,
    pub path_parameters: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub request_context: RequestContext,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// Claims placed by the external token validator.
    pub authorizer: Option<Value>,
}

/// Outbound response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub is_base64_encoded: bool,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}
