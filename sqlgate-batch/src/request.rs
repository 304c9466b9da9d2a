use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlgate_core::{ApiError, ApiResult};

/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// One operation inside a batch request.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationSpec {
    /// Explicit id; operations without one get `op_<index>`.
    pub id: Option<String>,
    pub entity: String,
    pub action: String,
    #[serde(default, alias = "storeParams")]
    pub store_params: Map<String, Value>,
    #[serde(default, alias = "queryParams")]
    pub query_params: Map<String, Value>,
    #[serde(default, alias = "metadataParams")]
    pub metadata_params: HashMap<String, String>,
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
    /// Per-operation claims override; defaults to the request claims.
    pub claims: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchOptions {
    #[serde(default = "default_atomic")]
    pub atomic: bool,
    #[serde(default, alias = "continueOnError")]
    pub continue_on_error: bool,
}

fn default_atomic() -> bool {
    true
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            atomic: true,
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub options: BatchOptions,
}

impl BatchRequest {
    pub fn from_value(value: Value) -> ApiResult<BatchRequest> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::BadRequest(format!("malformed batch request: {e}")))
    }
}

/// Per-operation outcome record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationRecord {
    Completed { data: Value },
    Failed { error: String, status_code: u16 },
    Skipped { reason: String },
}

impl OperationRecord {
    pub fn is_completed(&self) -> bool {
        matches!(self, OperationRecord::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, OperationRecord::Failed { .. })
    }
}

/// Aggregate batch result.
///
/// `success` is true iff every planned operation completed. Completed
/// entries keep their status even when an atomic batch rolled back; the
/// aggregate flag carries the rollback.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub results: BTreeMap<String, OperationRecord>,
    pub failed_operations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_default_to_atomic() {
        let request = BatchRequest::from_value(json!({
            "operations": [
                {"entity": "album", "action": "create", "store_params": {"title": "X"}}
            ]
        }))
        .unwrap();
        assert!(request.options.atomic);
        assert!(!request.options.continue_on_error);
    }

    #[test]
    fn camel_case_aliases_are_accepted() {
        let request = BatchRequest::from_value(json!({
            "operations": [
                {
                    "id": "b",
                    "entity": "invoice_line",
                    "action": "create",
                    "storeParams": {"invoice_id": "$ref:a.invoice_id"},
                    "dependsOn": ["a"]
                }
            ],
            "options": {"continueOnError": true}
        }))
        .unwrap();
        assert_eq!(request.operations[0].depends_on, vec!["a"]);
        assert!(request.operations[0].store_params.contains_key("invoice_id"));
        assert!(request.options.continue_on_error);
    }

    #[test]
    fn missing_entity_is_rejected() {
        let err = BatchRequest::from_value(json!({
            "operations": [{"action": "create"}]
        }))
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn records_serialize_with_status_tag() {
        let record = OperationRecord::Failed {
            error: "boom".into(),
            status_code: 400,
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"status": "failed", "error": "boom", "status_code": 400})
        );
    }
}
