//! Delete handler.
//!
//! Requires an allowing rule under the delete action; the permission row
//! filter still applies as a conjunct.

use sqlgate_core::{ApiError, ApiResult, Operation};
use sqlgate_model::{EffectiveRule, EntitySchema};

use crate::filter::Filter;
use crate::template::render_row_filter;
use crate::{Dialect, ParamList, Statement};

pub struct DeleteBuilder<'a> {
    pub entity: &'a EntitySchema,
    pub operation: &'a Operation,
    pub rule: &'a EffectiveRule,
    pub dialect: Dialect,
    pub schema: Option<&'a str>,
}

impl<'a> DeleteBuilder<'a> {
    pub fn build(&self) -> ApiResult<Statement> {
        let op = self.operation;
        if !self.rule.allowed {
            return Err(ApiError::Forbidden(format!(
                "no delete permission on entity '{}'",
                self.entity.name
            )));
        }

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

        Ok(Statement {
            sql: format!(
                "DELETE FROM {}{where_clause}",
                self.entity.qualified_table(self.schema)
            ),
            params: params.into_values(),
        })
    }
}
