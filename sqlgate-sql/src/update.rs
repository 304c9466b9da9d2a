//! Update handler: permission-checked `UPDATE` with optimistic
//! concurrency.
//!
//! When the entity declares a concurrency property and the client supplied
//! its current value, that value joins the WHERE clause and the SET clause
//! bumps the token. Zero affected rows then distinguish `Conflict` (token
//! supplied) from `NotFound`.

use serde_json::Value;
use sqlgate_core::{ApiError, ApiResult, Operation, SqlValue};
use sqlgate_model::{EffectiveRule, EntitySchema, PropertyType};

use crate::filter::Filter;
use crate::insert::visible_properties;
use crate::template::render_row_filter;
use crate::{Dialect, ParamList, Statement};

/// The built update plus the refetch that returns the updated rows.
#[derive(Debug)]
pub struct UpdatePlan {
    pub statement: Statement,
    /// Whether the client supplied the current concurrency value.
    pub concurrency_supplied: bool,
    pub refetch: Statement,
    pub refetch_properties: Vec<String>,
}

pub struct UpdateBuilder<'a> {
    pub entity: &'a EntitySchema,
    pub operation: &'a Operation,
    pub rule: &'a EffectiveRule,
    pub dialect: Dialect,
    pub schema: Option<&'a str>,
}

impl<'a> UpdateBuilder<'a> {
    pub fn build(&self) -> ApiResult<UpdatePlan> {
        let op = self.operation;
        if !self.rule.allowed {
            return Err(ApiError::Forbidden(format!(
                "no write permission on entity '{}'",
                self.entity.name
            )));
        }
        if op.store_params.is_empty() {
            return Err(ApiError::BadRequest("empty store params for update".into()));
        }

        let concurrency = self.entity.concurrency();
        let mut supplied_token: Option<&Value> = None;

        for (key, value) in &op.store_params {
            if let Some(token_prop) = concurrency {
                if *key == token_prop.name {
                    // The current token value is matched, never written.
                    supplied_token = Some(value);
                    continue;
                }
            }
            let known = self.entity.properties.contains_key(key);
            if !known || !self.rule.permits(key) {
                return Err(ApiError::Forbidden(format!(
                    "property '{key}' is not writable on entity '{}'",
                    self.entity.name
                )));
            }
            if self.entity.properties[key].is_key {
                return Err(ApiError::BadRequest(format!(
                    "primary key '{key}' cannot be updated"
                )));
            }
        }

        // ── SET: store params in model order, then the token bump ───────
        let mut params = ParamList::new(self.dialect);
        let mut set_items = Vec::new();
        for descriptor in self.entity.properties.values() {
            if descriptor.is_concurrency {
                continue;
            }
            if let Some(raw) = op.store_params.get(&descriptor.name) {
                let placeholder = params.bind(descriptor.coerce(raw)?);
                set_items.push(format!("{} = {placeholder}", descriptor.column));
            }
        }
        if let Some(token_prop) = concurrency {
            let bump = match token_prop.property_type {
                PropertyType::DateTime => self.dialect.current_timestamp().to_string(),
                _ => params.bind(SqlValue::Text(uuid::Uuid::new_v4().to_string())),
            };
            set_items.push(format!("{} = {bump}", token_prop.column));
        }
        if set_items.is_empty() {
            return Err(ApiError::BadRequest(
                "no updatable properties in store params".into(),
            ));
        }

        // ── WHERE: user filters, row filter, concurrency equality ───────
        let mut conds = Vec::new();
        for (key, raw) in &op.query_params {
            let descriptor = self.entity.property(key)?;
            let filter = Filter::parse(key, raw)?;
            conds.push(filter.render(&descriptor.column, descriptor, &mut params)?);
        }
        if let Some(cond) = render_row_filter(self.rule, &op.claims, &mut params)? {
            conds.push(cond);
        }
        if let (Some(token_prop), Some(raw)) = (concurrency, supplied_token) {
            let placeholder = params.bind(token_prop.coerce(raw)?);
            conds.push(format!("{} = {placeholder}", token_prop.column));
        }

        let where_clause = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };

        let statement = Statement {
            sql: format!(
                "UPDATE {} SET {}{where_clause}",
                self.entity.qualified_table(self.schema),
                set_items.join(", ")
            ),
            params: params.into_values(),
        };

        let (refetch, refetch_properties) = self.build_refetch()?;

        Ok(UpdatePlan {
            statement,
            concurrency_supplied: supplied_token.is_some(),
            refetch,
            refetch_properties,
        })
    }

    /// Select the updated rows back, by the same filters minus the
    /// concurrency equality (the token has changed by then).
    fn build_refetch(&self) -> ApiResult<(Statement, Vec<String>)> {
        let op = self.operation;
        let visible = visible_properties(self.entity, self.rule);
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

        let mut params = ParamList::new(self.dialect);
        let mut conds = Vec::new();
        for (key, raw) in &op.query_params {
            let descriptor = self.entity.property(key)?;
            let filter = Filter::parse(key, raw)?;
            conds.push(filter.render(&descriptor.column, descriptor, &mut params)?);
        }
        if let Some(cond) = render_row_filter(self.rule, &op.claims, &mut params)? {
            conds.push(cond);
        }
        let where_clause = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };

        Ok((
            Statement {
                sql: format!(
                    "SELECT {} FROM {}{where_clause}",
                    items.join(", "),
                    self.entity.qualified_table(self.schema)
                ),
                params: params.into_values(),
            },
            visible.iter().map(|d| d.name.clone()).collect(),
        ))
    }
}
