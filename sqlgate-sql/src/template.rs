//! Row-filter templates with `${claims.PATH}` placeholders.
//!
//! Template text comes from the loaded API model and is trusted; the claim
//! values substituted into it are not, so every claim binds as a
//! parameter. A missing claim binds SQL NULL, which can never widen
//! access.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlgate_core::{ApiResult, Claims, SqlValue};
use sqlgate_model::EffectiveRule;

use crate::ParamList;

static CLAIM_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{claims\.([A-Za-z0-9_.]+)\}").expect("claim token pattern"));

/// Render one template, binding each `${claims.PATH}` token.
pub fn render_template(template: &str, claims: &Claims, params: &mut ParamList) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for capture in CLAIM_TOKEN.captures_iter(template) {
        let token = capture.get(0).map_or(0..0, |m| m.range());
        let path = &capture[1];
        out.push_str(&template[last..token.start]);

        let value = match claims.lookup(path) {
            None => SqlValue::Null,
            Some(value) => match SqlValue::from_json(value) {
                Some(scalar) => scalar,
                None => {
                    tracing::warn!(path, "claim value is not a scalar; binding NULL");
                    SqlValue::Null
                }
            },
        };
        out.push_str(&params.bind(value));
        last = token.end;
    }
    out.push_str(&template[last..]);
    out
}

/// Render the effective rule's row filter, if any, as a single condition.
///
/// Multiple role templates OR together; a permissive role without a
/// template has already dropped filtering at resolution time.
pub fn render_row_filter(
    rule: &EffectiveRule,
    claims: &Claims,
    params: &mut ParamList,
) -> ApiResult<Option<String>> {
    if !rule.has_row_filter() {
        return Ok(None);
    }
    let rendered: Vec<String> = rule
        .where_templates
        .iter()
        .map(|t| render_template(t, claims, params))
        .collect();
    if rendered.len() == 1 {
        Ok(Some(rendered.into_iter().next().unwrap_or_default()))
    } else {
        let joined = rendered
            .iter()
            .map(|c| format!("({c})"))
            .collect::<Vec<_>>()
            .join(" OR ");
        Ok(Some(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dialect;
    use serde_json::json;

    fn claims() -> Claims {
        Claims::from_authorizer(&json!({
            "sub": "u-7",
            "tenant": {"id": 42},
            "groups": ["a", "b"],
        }))
    }

    #[test]
    fn claim_binds_as_parameter_not_text() {
        let mut params = ParamList::new(Dialect::Postgres);
        let sql = render_template("id = ${claims.sub}", &claims(), &mut params);
        assert_eq!(sql, "id = $1");
        assert_eq!(params.into_values(), vec![SqlValue::Text("u-7".into())]);
    }

    #[test]
    fn dotted_paths_reach_nested_claims() {
        let mut params = ParamList::new(Dialect::Postgres);
        let sql = render_template("tenant_id = ${claims.tenant.id}", &claims(), &mut params);
        assert_eq!(sql, "tenant_id = $1");
        assert_eq!(params.into_values(), vec![SqlValue::Int(42)]);
    }

    #[test]
    fn missing_claim_binds_null() {
        let mut params = ParamList::new(Dialect::Postgres);
        render_template("owner = ${claims.nope}", &claims(), &mut params);
        assert_eq!(params.into_values(), vec![SqlValue::Null]);
    }

    #[test]
    fn non_scalar_claim_binds_null() {
        let mut params = ParamList::new(Dialect::Postgres);
        render_template("g = ${claims.groups}", &claims(), &mut params);
        assert_eq!(params.into_values(), vec![SqlValue::Null]);
    }

    #[test]
    fn multiple_tokens_bind_in_order() {
        let mut params = ParamList::new(Dialect::Postgres);
        let sql = render_template(
            "id = ${claims.sub} AND tenant_id = ${claims.tenant.id}",
            &claims(),
            &mut params,
        );
        assert_eq!(sql, "id = $1 AND tenant_id = $2");
        assert_eq!(params.into_values().len(), 2);
    }
}
