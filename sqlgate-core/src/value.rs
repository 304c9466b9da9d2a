use serde::{Deserialize, Serialize};

/// A typed SQL bind parameter.
///
/// Every user-supplied scalar that reaches a SQL statement travels as a
/// `SqlValue` in the statement's parameter list; scalars are never
/// interpolated into SQL text. The JSON conversions are lossless for
/// scalars so that an integer stays an integer all the way to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON scalar into a `SqlValue`.
    ///
    /// Returns `None` for arrays and objects; containers have no single
    /// bind representation.
    pub fn from_json(value: &serde_json::Value) -> Option<SqlValue> {
        match value {
            serde_json::Value::Null => Some(SqlValue::Null),
            serde_json::Value::Bool(b) => Some(SqlValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(SqlValue::Int(i))
                } else {
                    n.as_f64().map(SqlValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(SqlValue::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Bool(b) => serde_json::Value::Bool(*b),
            SqlValue::Int(i) => serde_json::Value::from(*i),
            SqlValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, Into::into)
            }
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_scalars_round_trip() {
        for value in [json!(null), json!(true), json!(42), json!(1.5), json!("x")] {
            let sql = SqlValue::from_json(&value).unwrap();
            assert_eq!(sql.to_json(), value);
        }
    }

    #[test]
    fn containers_have_no_bind_form() {
        assert!(SqlValue::from_json(&json!([1, 2])).is_none());
        assert!(SqlValue::from_json(&json!({"a": 1})).is_none());
    }

    #[test]
    fn integers_stay_integers() {
        let sql = SqlValue::from_json(&json!(7)).unwrap();
        assert_eq!(sql, SqlValue::Int(7));
        assert_ne!(sql, SqlValue::Text("7".into()));
    }
}
