//! # sqlgate-sql — parameterized SQL generation
//!
//! Per-action statement builders that turn an [`Operation`] plus the
//! resolved entity schema and effective permission rule into
//! `(sql, params)` pairs for one of the three supported dialects.
//!
//! Two invariants hold for every statement produced here:
//!
//! 1. Every user-supplied scalar is a bind parameter. Identifier text in
//!    the SQL comes exclusively from the loaded API model; request input
//!    only ever *selects among* model-declared names.
//! 2. Whenever the effective rule carries a row filter, the generated
//!    WHERE clause includes it as a conjunct.
//!
//! [`Operation`]: sqlgate_core::Operation

pub mod custom;
pub mod delete;
pub mod dialect;
pub mod filter;
pub mod insert;
pub mod select;
pub mod template;
pub mod update;

pub use custom::{CustomBuilder, CustomPlan};
pub use delete::DeleteBuilder;
pub use dialect::Dialect;
pub use filter::{Filter, FilterOp};
pub use insert::{InsertBuilder, InsertPlan};
pub use select::{ArrayRelationPlan, SelectBuilder, SelectColumn, SelectPlan};
pub use update::{UpdateBuilder, UpdatePlan};

use sqlgate_core::SqlValue;

/// A generated SQL statement and its bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Accumulates bind parameters, handing back the dialect's placeholder for
/// each. All builders funnel their operands through this type.
#[derive(Debug)]
pub struct ParamList {
    dialect: Dialect,
    values: Vec<SqlValue>,
}

impl ParamList {
    pub fn new(dialect: Dialect) -> ParamList {
        ParamList {
            dialect,
            values: Vec::new(),
        }
    }

    /// Append a value and return the placeholder that refers to it.
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}
