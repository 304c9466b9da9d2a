//! Create handler: permission- and type-checked `INSERT` statements with
//! key-generation strategies and concurrency-token initialization.

use sqlgate_core::{ApiError, ApiResult, Operation, SqlValue};
use sqlgate_model::{EffectiveRule, EntitySchema, KeyStrategy, PropertyDescriptor, PropertyType};

use crate::{Dialect, ParamList, Statement};

/// The built insert and how to obtain the inserted row afterwards.
#[derive(Debug)]
pub struct InsertPlan {
    pub statement: Statement,
    /// True when the statement itself returns the inserted row
    /// (`RETURNING`).
    pub returning: bool,
    /// Row-set keys of the returned row, in projection order.
    pub returning_properties: Vec<String>,
    /// Key value known before execution (manual and uuid strategies).
    pub known_key: Option<SqlValue>,
    /// Dialect follow-up query that reads a database-generated key.
    pub key_followup: Option<String>,
}

pub struct InsertBuilder<'a> {
    pub entity: &'a EntitySchema,
    pub operation: &'a Operation,
    pub rule: &'a EffectiveRule,
    pub dialect: Dialect,
    pub schema: Option<&'a str>,
}

/// Properties the caller gets back after a write: what the write rule
/// permits, plus the key and the concurrency token.
pub(crate) fn visible_properties<'e>(
    entity: &'e EntitySchema,
    rule: &EffectiveRule,
) -> Vec<&'e PropertyDescriptor> {
    entity
        .properties
        .values()
        .filter(|d| d.is_key || d.is_concurrency || rule.permits(&d.name))
        .collect()
}

fn concurrency_token(descriptor: &PropertyDescriptor, dialect: Dialect) -> (String, Option<SqlValue>) {
    match descriptor.property_type {
        // Timestamp tokens come from the database clock.
        PropertyType::DateTime => (dialect.current_timestamp().to_string(), None),
        _ => {
            let token = uuid::Uuid::new_v4().to_string();
            (String::new(), Some(SqlValue::Text(token)))
        }
    }
}

impl<'a> InsertBuilder<'a> {
    pub fn build(&self) -> ApiResult<InsertPlan> {
        let op = self.operation;
        if !self.rule.allowed {
            return Err(ApiError::Forbidden(format!(
                "no write permission on entity '{}'",
                self.entity.name
            )));
        }
        if op.store_params.is_empty() {
            return Err(ApiError::BadRequest("empty store params for create".into()));
        }

        // Every store key must name a property the caller may write.
        for key in op.store_params.keys() {
            let known = self.entity.properties.contains_key(key);
            if !known || !self.rule.permits(key) {
                return Err(ApiError::Forbidden(format!(
                    "property '{key}' is not writable on entity '{}'",
                    self.entity.name
                )));
            }
            let descriptor = &self.entity.properties[key];
            if descriptor.is_key && self.entity.key_strategy != KeyStrategy::Manual {
                return Err(ApiError::BadRequest(format!(
                    "primary key '{key}' is generated and cannot be supplied"
                )));
            }
            if descriptor.is_concurrency {
                return Err(ApiError::BadRequest(format!(
                    "concurrency property '{key}' is managed by the gateway"
                )));
            }
        }

        for descriptor in self.entity.properties.values() {
            let exempt = (descriptor.is_key && self.entity.key_strategy != KeyStrategy::Manual)
                || descriptor.is_concurrency;
            if descriptor.required && !exempt && !op.store_params.contains_key(&descriptor.name) {
                return Err(ApiError::BadRequest(format!(
                    "missing required property '{}'",
                    descriptor.name
                )));
            }
        }

        let mut params = ParamList::new(self.dialect);
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut known_key = None;

        for descriptor in self.entity.properties.values() {
            if let Some(raw) = op.store_params.get(&descriptor.name) {
                columns.push(descriptor.column.clone());
                let value = descriptor.coerce(raw)?;
                if descriptor.is_key {
                    known_key = Some(value.clone());
                }
                values.push(params.bind(value));
            } else if descriptor.is_key && self.entity.key_strategy == KeyStrategy::Uuid {
                let key = SqlValue::Text(uuid::Uuid::new_v4().to_string());
                known_key = Some(key.clone());
                columns.push(descriptor.column.clone());
                values.push(params.bind(key));
            } else if descriptor.is_key && self.entity.key_strategy == KeyStrategy::Manual {
                return Err(ApiError::BadRequest(format!(
                    "primary key '{}' is required for create",
                    descriptor.name
                )));
            } else if descriptor.is_concurrency {
                let (literal, bound) = concurrency_token(descriptor, self.dialect);
                columns.push(descriptor.column.clone());
                match bound {
                    Some(value) => values.push(params.bind(value)),
                    None => values.push(literal),
                }
            }
        }

        let returning_properties: Vec<String> = visible_properties(self.entity, self.rule)
            .iter()
            .map(|d| d.name.clone())
            .collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.entity.qualified_table(self.schema),
            columns.join(", "),
            values.join(", ")
        );

        let generated = self.entity.key_strategy.database_generated();
        let returning = self.dialect.supports_returning();
        if returning {
            let items: Vec<String> = visible_properties(self.entity, self.rule)
                .iter()
                .map(|d| {
                    if d.column == d.name {
                        d.column.clone()
                    } else {
                        format!("{} AS {}", d.column, d.name)
                    }
                })
                .collect();
            sql.push_str(&format!(" RETURNING {}", items.join(", ")));
        }

        let key_followup = if generated && !returning {
            self.dialect
                .generated_key_query(&self.entity.qualified_table(self.schema))
        } else {
            None
        };

        Ok(InsertPlan {
            statement: Statement {
                sql,
                params: params.into_values(),
            },
            returning,
            returning_properties,
            known_key,
            key_followup,
        })
    }
}

/// Read back one row by key after an insert, projecting the same
/// properties a `RETURNING` clause would.
pub fn build_refetch(
    entity: &EntitySchema,
    rule: &EffectiveRule,
    key: &SqlValue,
    dialect: Dialect,
    schema: Option<&str>,
) -> (Statement, Vec<String>) {
    let visible = visible_properties(entity, rule);
    let items: Vec<String> = visible
        .iter()
        .map(|d| {
            if d.column == d.name {
                d.column.clone()
            } else {
                format!("{} AS {}", d.column, d.name)
            }
        })
        .collect();
    let mut params = ParamList::new(dialect);
    let placeholder = params.bind(key.clone());
    let statement = Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = {placeholder}",
            items.join(", "),
            entity.qualified_table(schema),
            entity.key().column
        ),
        params: params.into_values(),
    };
    (statement, visible.iter().map(|d| d.name.clone()).collect())
}
