use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::claims::Claims;
use crate::error::{ApiError, ApiResult};

/// The action an [`Operation`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Custom,
    Batch,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Custom => "custom",
            Action::Batch => "batch",
        }
    }

    /// Permission-table action this maps to: `create`/`update` collapse
    /// to `write`.
    pub fn permission_action(&self) -> &'static str {
        match self {
            Action::Create | Action::Update => "write",
            Action::Delete => "delete",
            Action::Read | Action::Custom | Action::Batch => "read",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Action::Create | Action::Update | Action::Delete)
    }
}

impl std::str::FromStr for Action {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "custom" => Ok(Action::Custom),
            "batch" => Ok(Action::Batch),
            other => Err(ApiError::BadRequest(format!("unknown action '{other}'"))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `__sort` entry: column name and ascending flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub property: String,
    pub ascending: bool,
}

/// Canonical intermediate form of one gateway request.
///
/// Constructed by the request adapter (or by the batch orchestrator from an
/// operation spec), consumed by exactly one handler invocation, and never
/// mutated after dispatch. Reference substitution in batches produces a new
/// parameter tree rather than editing in place.
#[derive(Debug, Clone)]
pub struct Operation {
    pub entity: String,
    pub action: Action,
    /// Flat field -> filter expression map (`artist_id` -> `"eq::1"`).
    pub query_params: Map<String, Value>,
    /// Nested payload for writes.
    pub store_params: Map<String, Value>,
    /// Reserved `__`-prefixed parameters, stored without the prefix.
    pub metadata_params: HashMap<String, String>,
    pub claims: Claims,
    /// Name of the declared path operation, for `Action::Custom`.
    pub custom_operation: Option<String>,
}

impl Operation {
    pub fn new(entity: impl Into<String>, action: Action) -> Self {
        Operation {
            entity: entity.into(),
            action,
            query_params: Map::new(),
            store_params: Map::new(),
            metadata_params: HashMap::new(),
            claims: Claims::default(),
            custom_operation: None,
        }
    }

    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_query_params(mut self, params: Map<String, Value>) -> Self {
        self.query_params = params;
        self
    }

    pub fn with_store_params(mut self, params: Map<String, Value>) -> Self {
        self.store_params = params;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata_params.insert(key.to_string(), value.into());
        self
    }

    // ── Metadata accessors ──────────────────────────────────────────────

    fn metadata_u64(&self, key: &str) -> ApiResult<Option<u64>> {
        match self.metadata_params.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| {
                ApiError::BadRequest(format!("__{key} must be a non-negative integer, got '{raw}'"))
            }),
        }
    }

    pub fn limit(&self) -> ApiResult<Option<u64>> {
        self.metadata_u64("limit")
    }

    pub fn offset(&self) -> ApiResult<Option<u64>> {
        self.metadata_u64("offset")
    }

    /// Parse `__sort=col1:asc,col2:desc`. Direction defaults to ascending.
    /// Property names are validated against the model by the select
    /// handler, not here.
    pub fn sort(&self) -> ApiResult<Vec<SortKey>> {
        let Some(raw) = self.metadata_params.get("sort") else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        for part in raw.split(',').filter(|p| !p.is_empty()) {
            let (property, direction) = match part.split_once(':') {
                Some((p, d)) => (p, d),
                None => (part, "asc"),
            };
            let ascending = match direction {
                "asc" => true,
                "desc" => false,
                other => {
                    return Err(ApiError::BadRequest(format!(
                        "invalid sort direction '{other}' in __sort"
                    )))
                }
            };
            keys.push(SortKey {
                property: property.to_string(),
                ascending,
            });
        }
        Ok(keys)
    }

    /// Requested projection from `__properties`, comma-separated.
    pub fn requested_properties(&self) -> Option<Vec<String>> {
        self.metadata_params.get("properties").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
    }

    /// Relations requested via `__include`.
    pub fn includes(&self) -> Vec<String> {
        self.metadata_params
            .get("include")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `__count=true` was requested.
    pub fn wants_count(&self) -> bool {
        self.metadata_params
            .get("count")
            .is_some_and(|v| v == "true" || v == "1")
    }
}
