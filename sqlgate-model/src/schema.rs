use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use sqlgate_core::{ApiError, ApiResult, SqlValue};

/// Semantic type of a property, as declared in the spec document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Integer,
    Number,
    String,
    Boolean,
    DateTime,
    Uuid,
}

impl PropertyType {
    pub fn from_spec(s: &str) -> Option<PropertyType> {
        match s {
            "integer" => Some(PropertyType::Integer),
            "number" => Some(PropertyType::Number),
            "string" => Some(PropertyType::String),
            "boolean" => Some(PropertyType::Boolean),
            "date-time" => Some(PropertyType::DateTime),
            "uuid" => Some(PropertyType::Uuid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::String => "string",
            PropertyType::Boolean => "boolean",
            PropertyType::DateTime => "date-time",
            PropertyType::Uuid => "uuid",
        }
    }
}

/// Primary-key generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Database-generated (identity/auto-increment).
    Auto,
    /// Client supplies the key.
    Manual,
    /// Gateway generates a v4 UUID.
    Uuid,
    /// Database sequence.
    Sequence,
}

impl KeyStrategy {
    pub fn from_spec(s: &str) -> Option<KeyStrategy> {
        match s {
            "auto" => Some(KeyStrategy::Auto),
            "manual" => Some(KeyStrategy::Manual),
            "uuid" => Some(KeyStrategy::Uuid),
            "sequence" => Some(KeyStrategy::Sequence),
            _ => None,
        }
    }

    /// Whether the database produces the key value.
    pub fn database_generated(&self) -> bool {
        matches!(self, KeyStrategy::Auto | KeyStrategy::Sequence)
    }
}

/// One property of an entity. Immutable after load.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Logical name, used in requests and responses.
    pub name: String,
    /// Storage column name.
    pub column: String,
    pub property_type: PropertyType,
    pub max_length: Option<usize>,
    pub required: bool,
    pub is_key: bool,
    pub is_concurrency: bool,
}

impl PropertyDescriptor {
    /// Coerce a request value to this property's type, yielding a bind
    /// parameter. Query-string operands arrive as strings and are parsed;
    /// JSON body values must already carry the right type.
    pub fn coerce(&self, value: &Value) -> ApiResult<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let mismatch = || {
            ApiError::BadRequest(format!(
                "property '{}' expects {}, got {value}",
                self.name,
                self.property_type.as_str()
            ))
        };
        match self.property_type {
            PropertyType::Integer => match value {
                Value::Number(n) => n.as_i64().map(SqlValue::Int).ok_or_else(mismatch),
                Value::String(s) => s.parse::<i64>().map(SqlValue::Int).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            PropertyType::Number => match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(SqlValue::Int(i))
                    } else {
                        n.as_f64().map(SqlValue::Float).ok_or_else(mismatch)
                    }
                }
                Value::String(s) => s
                    .parse::<f64>()
                    .map(SqlValue::Float)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            PropertyType::String => match value {
                Value::String(s) => {
                    if let Some(max) = self.max_length {
                        if s.chars().count() > max {
                            return Err(ApiError::BadRequest(format!(
                                "property '{}' exceeds max length {max}",
                                self.name
                            )));
                        }
                    }
                    Ok(SqlValue::Text(s.clone()))
                }
                _ => Err(mismatch()),
            },
            PropertyType::Boolean => match value {
                Value::Bool(b) => Ok(SqlValue::Bool(*b)),
                Value::String(s) if s == "true" => Ok(SqlValue::Bool(true)),
                Value::String(s) if s == "false" => Ok(SqlValue::Bool(false)),
                _ => Err(mismatch()),
            },
            PropertyType::DateTime => match value {
                Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                    .map(|_| SqlValue::Text(s.clone()))
                    .map_err(|_| {
                        ApiError::BadRequest(format!(
                            "property '{}' expects an RFC 3339 date-time, got '{s}'",
                            self.name
                        ))
                    }),
                _ => Err(mismatch()),
            },
            PropertyType::Uuid => match value {
                Value::String(s) => uuid::Uuid::parse_str(s)
                    .map(|_| SqlValue::Text(s.clone()))
                    .map_err(|_| {
                        ApiError::BadRequest(format!(
                            "property '{}' expects a UUID, got '{s}'",
                            self.name
                        ))
                    }),
                _ => Err(mismatch()),
            },
        }
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// 1:1 - loaded with an inner join.
    Object,
    /// 1:many - loaded with a second keyed query.
    Array,
}

/// A declared relation to another entity.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    /// Referenced entity's logical name.
    pub entity: String,
    /// For `Object`: the FK property on the owning entity.
    /// For `Array`: the key property on the owning entity the children
    /// point back to.
    pub parent_property: String,
    /// For `Array`: the FK property on the referenced entity.
    pub child_property: Option<String>,
}

/// One permission rule, always stored in the normalized object form.
///
/// The concise spec forms decompress at load time: a bare regex string
/// becomes `{ properties, where: None }`, a bare boolean becomes an
/// allow/deny flag.
#[derive(Debug, Clone)]
pub struct Rule {
    pub allow: bool,
    /// Property-pattern regex source; validated to compile at load.
    pub properties: Option<String>,
    /// Row-filter template with `${claims.PATH}` placeholders.
    pub where_template: Option<String>,
}

/// Permission table: provider -> action -> role -> rule.
///
/// Actions are stored normalized (`read` | `write` | `delete`);
/// `create` and `update` collapse to `write` at parse time.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    pub providers: HashMap<String, HashMap<String, HashMap<String, Rule>>>,
}

impl PermissionTable {
    pub fn rules_for(&self, provider: &str, action: &str) -> Option<&HashMap<String, Rule>> {
        self.providers.get(provider)?.get(action)
    }
}

/// Parsed schema for one entity.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    /// Logical name (the request path segment).
    pub name: String,
    /// Database binding name.
    pub database: String,
    /// Table name; defaults to the logical name.
    pub table: String,
    pub key_property: String,
    pub key_strategy: KeyStrategy,
    pub concurrency_property: Option<String>,
    /// Ordered by property name for deterministic SQL output.
    pub properties: BTreeMap<String, PropertyDescriptor>,
    pub relations: BTreeMap<String, RelationDescriptor>,
    pub permissions: PermissionTable,
}

impl EntitySchema {
    pub fn property(&self, name: &str) -> ApiResult<&PropertyDescriptor> {
        self.properties.get(name).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown property '{name}' on entity '{}'", self.name))
        })
    }

    pub fn key(&self) -> &PropertyDescriptor {
        // Load-time validation guarantees exactly one key property.
        self.properties
            .values()
            .find(|p| p.is_key)
            .unwrap_or_else(|| unreachable!("entity '{}' validated to have a key", self.name))
    }

    pub fn concurrency(&self) -> Option<&PropertyDescriptor> {
        self.concurrency_property
            .as_deref()
            .and_then(|name| self.properties.get(name))
    }

    /// Table reference with the optional schema prefix applied.
    pub fn qualified_table(&self, schema: Option<&str>) -> String {
        match schema {
            Some(prefix) => format!("{prefix}.{}", self.table),
            None => self.table.clone(),
        }
    }
}

/// Declared input of a custom path operation.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub required: bool,
    pub default: Option<Value>,
}

/// A pre-declared named SQL operation with named bind parameters.
#[derive(Debug, Clone)]
pub struct CustomOperation {
    pub name: String,
    /// SQL template with `:name` bind placeholders.
    pub sql: String,
    pub inputs: BTreeMap<String, InputSpec>,
    /// Output column alias -> response field name.
    pub outputs: BTreeMap<String, String>,
}

/// Immutable snapshot of the whole API model.
#[derive(Debug, Clone, Default)]
pub struct ApiModel {
    pub entities: BTreeMap<String, EntitySchema>,
    pub operations: BTreeMap<String, CustomOperation>,
}

impl ApiModel {
    /// Parse and validate a declarative spec document from YAML (or JSON,
    /// which is valid YAML).
    pub fn from_yaml(document: &str) -> ApiResult<ApiModel> {
        let tree: Value = serde_yaml::from_str(document)
            .map_err(|e| ApiError::Spec(format!("spec document is not valid YAML: {e}")))?;
        Self::from_value(&tree)
    }

    /// Parse and validate a declarative spec document from an object tree.
    pub fn from_value(tree: &Value) -> ApiResult<ApiModel> {
        crate::spec::parse_model(tree)
    }

    pub fn entity(&self, name: &str) -> ApiResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown entity '{name}'")))
    }

    pub fn operation(&self, name: &str) -> ApiResult<&CustomOperation> {
        self.operations
            .get(name)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown path operation '{name}'")))
    }
}
