//! Custom path operations: pre-declared named SQL templates with `:name`
//! bind parameters.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlgate_core::{ApiError, ApiResult, Operation, SqlValue};
use sqlgate_model::CustomOperation;

use crate::{Dialect, ParamList, Statement};

static BIND_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("bind token pattern"));

/// The built custom statement and the declared output aliasing.
#[derive(Debug)]
pub struct CustomPlan {
    pub statement: Statement,
    /// Output column alias -> response field name.
    pub outputs: std::collections::BTreeMap<String, String>,
}

pub struct CustomBuilder<'a> {
    pub declaration: &'a CustomOperation,
    pub operation: &'a Operation,
    pub dialect: Dialect,
}

impl<'a> CustomBuilder<'a> {
    pub fn build(&self) -> ApiResult<CustomPlan> {
        let inputs = self.gather_inputs()?;
        let declaration = self.declaration;

        let mut params = ParamList::new(self.dialect);
        let mut sql = String::with_capacity(declaration.sql.len());
        let mut last = 0;
        for capture in BIND_TOKEN.captures_iter(&declaration.sql) {
            let Some(token) = capture.get(0) else { continue };
            // `::` is a cast, not a bind parameter.
            if declaration.sql[..token.start()].ends_with(':') {
                continue;
            }
            let name = &capture[1];
            let value = inputs.get(name).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "no value for bind parameter ':{name}' in operation '{}'",
                    declaration.name
                ))
            })?;
            let scalar = SqlValue::from_json(value).ok_or_else(|| {
                ApiError::BadRequest(format!("bind parameter ':{name}' must be a scalar"))
            })?;
            sql.push_str(&declaration.sql[last..token.start()]);
            sql.push_str(&params.bind(scalar));
            last = token.end();
        }
        sql.push_str(&declaration.sql[last..]);

        Ok(CustomPlan {
            statement: Statement {
                sql,
                params: params.into_values(),
            },
            outputs: declaration.outputs.clone(),
        })
    }

    /// Merge declared inputs from query and store params, applying
    /// defaults and enforcing required inputs.
    fn gather_inputs(&self) -> ApiResult<Map<String, Value>> {
        let op = self.operation;
        let mut inputs = Map::new();
        for (name, spec) in &self.declaration.inputs {
            let value = op
                .query_params
                .get(name)
                .or_else(|| op.store_params.get(name))
                .cloned()
                .or_else(|| spec.default.clone());
            match value {
                Some(value) => {
                    inputs.insert(name.clone(), value);
                }
                None if spec.required => {
                    return Err(ApiError::BadRequest(format!(
                        "missing required input '{name}' for operation '{}'",
                        self.declaration.name
                    )));
                }
                None => {}
            }
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlgate_core::Action;
    use sqlgate_model::ApiModel;

    fn model() -> ApiModel {
        ApiModel::from_yaml(
            r#"
schema_objects:
  album:
    database: chinook
    properties:
      album_id: { type: integer, primary-key: auto }
path_operations:
  top_albums:
    sql: "SELECT title, COUNT(*) AS sales FROM album WHERE artist_id = :artist_id GROUP BY title LIMIT :limit"
    inputs:
      artist_id: { required: true }
      limit: { default: 10 }
    outputs:
      sales: total_sales
  tagged:
    sql: "SELECT id FROM item WHERE tag = :tag::text"
    inputs:
      tag: { required: true }
"#,
        )
        .unwrap()
    }

    fn build(name: &str, query: Value) -> ApiResult<CustomPlan> {
        let model = model();
        let declaration = model.operation(name)?;
        let mut op = Operation::new("album", Action::Custom);
        op.custom_operation = Some(name.to_string());
        op.query_params = query.as_object().cloned().unwrap_or_default();
        CustomBuilder {
            declaration,
            operation: &op,
            dialect: Dialect::Postgres,
        }
        .build()
    }

    #[test]
    fn binds_named_parameters_in_order() {
        let plan = build("top_albums", json!({"artist_id": "3"})).unwrap();
        assert_eq!(
            plan.statement.sql,
            "SELECT title, COUNT(*) AS sales FROM album WHERE artist_id = $1 GROUP BY title LIMIT $2"
        );
        assert_eq!(
            plan.statement.params,
            vec![SqlValue::Text("3".into()), SqlValue::Int(10)]
        );
        assert_eq!(plan.outputs.get("sales").map(String::as_str), Some("total_sales"));
    }

    #[test]
    fn missing_required_input_is_rejected() {
        assert!(matches!(
            build("top_albums", json!({})),
            Err(ApiError::BadRequest(msg)) if msg.contains("artist_id")
        ));
    }

    #[test]
    fn casts_are_not_bind_parameters() {
        let plan = build("tagged", json!({"tag": "blue"})).unwrap();
        assert_eq!(plan.statement.sql, "SELECT id FROM item WHERE tag = $1::text");
        assert_eq!(plan.statement.params.len(), 1);
    }
}
