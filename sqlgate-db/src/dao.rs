use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sqlgate_core::{Action, ApiError, ApiResult, GatewayConfig, Operation, SqlValue};
use sqlgate_model::{ApiModel, PermissionResolver};
use sqlgate_sql::select::build_child_select;
use sqlgate_sql::{
    insert::build_refetch, CustomBuilder, DeleteBuilder, Dialect, InsertBuilder, SelectBuilder,
    SelectColumn, UpdateBuilder,
};

use crate::connection::{Connection, QueryOutput};

/// Narrow execution seam between the DAO and the batch orchestrator.
///
/// The orchestrator drives operations through this trait instead of
/// depending on the DAO type, which keeps the dependency graph acyclic.
#[async_trait::async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Execute one operation on the given connection and return its
    /// result value (a row list, or a record for deletes).
    ///
    /// Never commits or rolls back; the transaction boundary belongs to
    /// the caller.
    async fn execute(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value>;
}

/// Routes an [`Operation`] to the right SQL handler, manages the
/// statement lifecycle on the caller's connection, and marshals row sets
/// into nested maps keyed by property name.
pub struct OperationDao {
    model: Arc<ApiModel>,
    resolver: PermissionResolver,
    dialect: Dialect,
    schema: Option<String>,
    default_page_size: Option<u64>,
}

impl OperationDao {
    pub fn new(model: Arc<ApiModel>, config: &GatewayConfig) -> OperationDao {
        OperationDao {
            model,
            resolver: PermissionResolver::new(),
            dialect: Dialect::from_engine(config.engine),
            schema: config.schema.clone(),
            default_page_size: config.default_page_size,
        }
    }

    pub fn model(&self) -> &Arc<ApiModel> {
        &self.model
    }

    async fn read(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value> {
        let entity = self.model.entity(&op.entity)?;
        let rule = self.resolver.resolve(entity, Action::Read, &op.claims)?;
        let plan = SelectBuilder {
            model: &self.model,
            entity,
            operation: op,
            rule: &rule,
            resolver: &self.resolver,
            dialect: self.dialect,
            schema: self.schema.as_deref(),
            default_limit: self.default_page_size,
        }
        .build()?;

        let output = conn
            .execute(&plan.statement.sql, &plan.statement.params)
            .await?;

        let mut results: Vec<Value> = output
            .rows
            .iter()
            .map(|row| materialize_row(row, &plan.columns))
            .collect();

        for array in &plan.array_relations {
            // Distinct join keys, in row order.
            let mut keys: Vec<SqlValue> = Vec::new();
            for row in &output.rows {
                let raw = row.get(&array.parent_key_alias).cloned().unwrap_or(Value::Null);
                if let Some(key) = SqlValue::from_json(&raw) {
                    if !key.is_null() && !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }

            if keys.is_empty() {
                for result in &mut results {
                    if let Some(obj) = result.as_object_mut() {
                        obj.insert(array.relation.clone(), Value::Array(Vec::new()));
                    }
                }
                continue;
            }

            let child = self.model.entity(&array.child_entity)?;
            let child_rule = self.resolver.resolve(child, Action::Read, &op.claims)?;
            let (statement, columns, fk_alias) = build_child_select(
                child,
                &child_rule,
                &array.child_property,
                &keys,
                &op.claims,
                self.dialect,
                self.schema.as_deref(),
            )?;
            let child_output = conn.execute(&statement.sql, &statement.params).await?;

            let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
            for row in &child_output.rows {
                let key = row.get(&fk_alias).cloned().unwrap_or(Value::Null);
                groups
                    .entry(key.to_string())
                    .or_default()
                    .push(materialize_row(row, &columns));
            }

            for (row, result) in output.rows.iter().zip(results.iter_mut()) {
                let key = row.get(&array.parent_key_alias).cloned().unwrap_or(Value::Null);
                let children = groups.get(&key.to_string()).cloned().unwrap_or_default();
                if let Some(obj) = result.as_object_mut() {
                    obj.insert(array.relation.clone(), Value::Array(children));
                }
            }
        }

        Ok(Value::Array(results))
    }

    async fn create(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value> {
        let entity = self.model.entity(&op.entity)?;
        let rule = self.resolver.resolve(entity, Action::Create, &op.claims)?;
        let plan = InsertBuilder {
            entity,
            operation: op,
            rule: &rule,
            dialect: self.dialect,
            schema: self.schema.as_deref(),
        }
        .build()?;

        let output = conn
            .execute(&plan.statement.sql, &plan.statement.params)
            .await?;

        if plan.returning {
            let row = output.rows.first().ok_or_else(|| {
                ApiError::Internal("insert returned no row".into())
            })?;
            let record = pick_properties(row, &plan.returning_properties);
            return Ok(Value::Array(vec![record]));
        }

        let key = match plan.known_key {
            Some(key) => key,
            None => self.generated_key(conn, &output, plan.key_followup.as_deref()).await?,
        };

        let (refetch, properties) =
            build_refetch(entity, &rule, &key, self.dialect, self.schema.as_deref());
        let refetched = conn.execute(&refetch.sql, &refetch.params).await?;
        let rows = refetched
            .rows
            .iter()
            .map(|row| pick_properties(row, &properties))
            .collect();
        Ok(Value::Array(rows))
    }

    /// Read the database-generated key: the driver-reported id when the
    /// engine exposes one, otherwise the dialect's follow-up query.
    async fn generated_key(
        &self,
        conn: &mut dyn Connection,
        output: &QueryOutput,
        followup: Option<&str>,
    ) -> ApiResult<SqlValue> {
        if let Some(id) = output.last_insert_id {
            return Ok(SqlValue::Int(id));
        }
        let sql = followup
            .ok_or_else(|| ApiError::Internal("no way to read the generated key".into()))?;
        let key_output = conn.execute(sql, &[]).await?;
        let raw = key_output
            .rows
            .first()
            .and_then(|row| row.values().next())
            .cloned()
            .ok_or_else(|| ApiError::Internal("generated key query returned no row".into()))?;
        SqlValue::from_json(&raw)
            .ok_or_else(|| ApiError::Internal("generated key is not a scalar".into()))
    }

    async fn update(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value> {
        let entity = self.model.entity(&op.entity)?;
        let rule = self.resolver.resolve(entity, Action::Update, &op.claims)?;
        let plan = UpdateBuilder {
            entity,
            operation: op,
            rule: &rule,
            dialect: self.dialect,
            schema: self.schema.as_deref(),
        }
        .build()?;

        let output = conn
            .execute(&plan.statement.sql, &plan.statement.params)
            .await?;

        if output.rowcount == 0 {
            return Err(if plan.concurrency_supplied {
                ApiError::Conflict("concurrency value does not match the stored row".into())
            } else {
                ApiError::NotFound(format!("no matching rows on entity '{}'", op.entity))
            });
        }

        let refetched = conn.execute(&plan.refetch.sql, &plan.refetch.params).await?;
        let rows = refetched
            .rows
            .iter()
            .map(|row| pick_properties(row, &plan.refetch_properties))
            .collect();
        Ok(Value::Array(rows))
    }

    async fn delete(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value> {
        let entity = self.model.entity(&op.entity)?;
        let rule = self.resolver.resolve(entity, Action::Delete, &op.claims)?;
        let statement = DeleteBuilder {
            entity,
            operation: op,
            rule: &rule,
            dialect: self.dialect,
            schema: self.schema.as_deref(),
        }
        .build()?;

        let output = conn.execute(&statement.sql, &statement.params).await?;
        Ok(json!({ "deleted": output.rowcount }))
    }

    async fn custom(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value> {
        let name = op
            .custom_operation
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("no path operation named".into()))?;
        let declaration = self.model.operation(name)?;
        let plan = CustomBuilder {
            declaration,
            operation: op,
            dialect: self.dialect,
        }
        .build()?;

        let output = conn
            .execute(&plan.statement.sql, &plan.statement.params)
            .await?;

        let rows = output
            .rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (column, value) in row {
                    let field = plan
                        .outputs
                        .get(column)
                        .cloned()
                        .unwrap_or_else(|| column.clone());
                    obj.insert(field, value.clone());
                }
                Value::Object(obj)
            })
            .collect();
        Ok(Value::Array(rows))
    }
}

#[async_trait::async_trait]
impl OperationExecutor for OperationDao {
    async fn execute(&self, conn: &mut dyn Connection, op: &Operation) -> ApiResult<Value> {
        tracing::debug!(entity = %op.entity, action = %op.action, "executing operation");
        match op.action {
            Action::Read => self.read(conn, op).await,
            Action::Create => self.create(conn, op).await,
            Action::Update => self.update(conn, op).await,
            Action::Delete => self.delete(conn, op).await,
            Action::Custom => self.custom(conn, op).await,
            Action::Batch => Err(ApiError::Internal(
                "batch operations are dispatched by the service pipeline".into(),
            )),
        }
    }
}

/// Shape one row-set row into the response form: nested maps per
/// relation, hidden key columns stripped.
fn materialize_row(row: &Map<String, Value>, columns: &[SelectColumn]) -> Value {
    let mut obj = Map::new();
    let mut nested: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
    for column in columns {
        if column.hidden {
            continue;
        }
        let value = row.get(&column.alias).cloned().unwrap_or(Value::Null);
        match &column.relation {
            None => {
                obj.insert(column.property.clone(), value);
            }
            Some(relation) => {
                nested
                    .entry(relation.as_str())
                    .or_default()
                    .insert(column.property.clone(), value);
            }
        }
    }
    for (relation, map) in nested {
        obj.insert(relation.to_string(), Value::Object(map));
    }
    Value::Object(obj)
}

fn pick_properties(row: &Map<String, Value>, properties: &[String]) -> Value {
    let mut obj = Map::new();
    for property in properties {
        obj.insert(
            property.clone(),
            row.get(property).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(obj)
}
