//! The `<op>::<operand>` filter-expression grammar used in query
//! parameters.
//!
//! An absent prefix means `eq`. `in`/`not-in` split their operand on `,`;
//! `between`/`not-between` take exactly two comma-separated operands. A
//! `null` operand under `eq`/`ne` compiles to `IS NULL`/`IS NOT NULL`;
//! under any other operator it is rejected.

use serde_json::Value;
use sqlgate_core::{ApiError, ApiResult};
use sqlgate_model::PropertyDescriptor;

use crate::ParamList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Between,
    NotBetween,
    Like,
}

impl FilterOp {
    fn from_tag(tag: &str) -> Option<FilterOp> {
        match tag {
            "eq" => Some(FilterOp::Eq),
            "ne" => Some(FilterOp::Ne),
            "lt" => Some(FilterOp::Lt),
            "le" => Some(FilterOp::Le),
            "gt" => Some(FilterOp::Gt),
            "ge" => Some(FilterOp::Ge),
            "in" => Some(FilterOp::In),
            "not-in" => Some(FilterOp::NotIn),
            "between" => Some(FilterOp::Between),
            "not-between" => Some(FilterOp::NotBetween),
            "like" => Some(FilterOp::Like),
            _ => None,
        }
    }

    /// SQL operator text for the binary comparison forms.
    fn comparison_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Like => "LIKE",
            _ => unreachable!("not a binary comparison"),
        }
    }

    fn takes_list(&self) -> bool {
        matches!(
            self,
            FilterOp::In | FilterOp::NotIn | FilterOp::Between | FilterOp::NotBetween
        )
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub op: FilterOp,
    pub operands: Vec<Value>,
}

/// The literal string `null` (or a JSON null) denotes SQL NULL.
fn parse_operand(token: &str) -> Value {
    if token == "null" {
        Value::Null
    } else {
        Value::String(token.to_string())
    }
}

impl Filter {
    /// Parse a raw query-parameter value into a filter.
    ///
    /// Strings carry the `<op>::<operand>` grammar; other JSON scalars
    /// (which appear after batch reference substitution) are equality
    /// matches on the typed value.
    pub fn parse(field: &str, raw: &Value) -> ApiResult<Filter> {
        match raw {
            Value::String(s) => {
                let (op, rest) = match s.split_once("::") {
                    None => (FilterOp::Eq, s.as_str()),
                    Some((tag, rest)) => {
                        let op = FilterOp::from_tag(tag).ok_or_else(|| {
                            ApiError::BadRequest(format!(
                                "unknown filter operator '{tag}' on '{field}'"
                            ))
                        })?;
                        (op, rest)
                    }
                };
                let operands = if op.takes_list() {
                    rest.split(',')
                        .filter(|t| !t.is_empty())
                        .map(parse_operand)
                        .collect()
                } else {
                    vec![parse_operand(rest)]
                };
                Ok(Filter { op, operands })
            }
            Value::Array(_) | Value::Object(_) => Err(ApiError::BadRequest(format!(
                "filter value for '{field}' must be a scalar"
            ))),
            scalar => Ok(Filter {
                op: FilterOp::Eq,
                operands: vec![scalar.clone()],
            }),
        }
    }

    /// Render this filter as a WHERE condition on `column`, binding all
    /// operands through `params` after coercing them to the property's
    /// type.
    pub fn render(
        &self,
        column: &str,
        descriptor: &PropertyDescriptor,
        params: &mut ParamList,
    ) -> ApiResult<String> {
        let field = &descriptor.name;
        match self.op {
            FilterOp::Eq | FilterOp::Ne if self.operands.len() == 1 && self.operands[0].is_null() => {
                Ok(if self.op == FilterOp::Eq {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} IS NOT NULL")
                })
            }
            FilterOp::Eq
            | FilterOp::Ne
            | FilterOp::Lt
            | FilterOp::Le
            | FilterOp::Gt
            | FilterOp::Ge
            | FilterOp::Like => {
                let operand = self.single_operand(field)?;
                if operand.is_null() {
                    return Err(ApiError::BadRequest(format!(
                        "operator on '{field}' does not accept null"
                    )));
                }
                // LIKE patterns bind verbatim; coercion would reject the
                // wildcard characters against typed columns.
                let value = if self.op == FilterOp::Like {
                    match operand {
                        Value::String(s) => sqlgate_core::SqlValue::Text(s.clone()),
                        _ => {
                            return Err(ApiError::BadRequest(format!(
                                "like pattern on '{field}' must be a string"
                            )))
                        }
                    }
                } else {
                    descriptor.coerce(operand)?
                };
                let placeholder = params.bind(value);
                Ok(format!("{column} {} {placeholder}", self.op.comparison_sql()))
            }
            FilterOp::In | FilterOp::NotIn => {
                if self.operands.is_empty() {
                    return Err(ApiError::BadRequest(format!(
                        "in filter on '{field}' needs at least one operand"
                    )));
                }
                let mut placeholders = Vec::with_capacity(self.operands.len());
                for operand in &self.operands {
                    if operand.is_null() {
                        return Err(ApiError::BadRequest(format!(
                            "in filter on '{field}' does not accept null"
                        )));
                    }
                    placeholders.push(params.bind(descriptor.coerce(operand)?));
                }
                let keyword = if self.op == FilterOp::In {
                    "IN"
                } else {
                    "NOT IN"
                };
                Ok(format!("{column} {keyword} ({})", placeholders.join(", ")))
            }
            FilterOp::Between | FilterOp::NotBetween => {
                if self.operands.len() != 2 {
                    return Err(ApiError::BadRequest(format!(
                        "between filter on '{field}' takes exactly two operands"
                    )));
                }
                if self.operands.iter().any(Value::is_null) {
                    return Err(ApiError::BadRequest(format!(
                        "between filter on '{field}' does not accept null"
                    )));
                }
                let low = params.bind(descriptor.coerce(&self.operands[0])?);
                let high = params.bind(descriptor.coerce(&self.operands[1])?);
                let keyword = if self.op == FilterOp::Between {
                    "BETWEEN"
                } else {
                    "NOT BETWEEN"
                };
                Ok(format!("{column} {keyword} {low} AND {high}"))
            }
        }
    }

    fn single_operand(&self, field: &str) -> ApiResult<&Value> {
        match self.operands.as_slice() {
            [operand] => Ok(operand),
            _ => Err(ApiError::BadRequest(format!(
                "filter on '{field}' takes exactly one operand"
            ))),
        }
    }
}
