//! Read handler: builds `SELECT` statements with permission projection,
//! association joins, metadata-driven sort and paging, and row-level
//! filters.

use std::collections::BTreeMap;

use sqlgate_core::{Action, ApiError, ApiResult, Operation};
use sqlgate_model::{
    ApiModel, EffectiveRule, EntitySchema, PermissionResolver, PropertyDescriptor,
    RelationDescriptor, RelationKind,
};

use crate::filter::Filter;
use crate::template::render_row_filter;
use crate::{Dialect, ParamList, Statement};

/// One projected output column: how the row-set key maps back into the
/// response shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    /// Key under which the value arrives in the row set.
    pub alias: String,
    /// Logical property name in the response.
    pub property: String,
    /// Present when the value nests under a relation name.
    pub relation: Option<String>,
    /// Selected only to key a follow-up query; stripped from the response.
    pub hidden: bool,
}

impl SelectColumn {
    fn plain(property: &str) -> SelectColumn {
        SelectColumn {
            alias: property.to_string(),
            property: property.to_string(),
            relation: None,
            hidden: false,
        }
    }
}

/// A 1:many association loaded with a second query keyed by the parent
/// rows.
#[derive(Debug, Clone)]
pub struct ArrayRelationPlan {
    pub relation: String,
    /// Row-set key on the parent rows holding the join key.
    pub parent_key_alias: String,
    pub child_entity: String,
    /// FK property on the child entity.
    pub child_property: String,
}

/// The built read: main statement plus the metadata needed to marshal
/// rows and load array associations.
#[derive(Debug)]
pub struct SelectPlan {
    pub statement: Statement,
    pub columns: Vec<SelectColumn>,
    pub array_relations: Vec<ArrayRelationPlan>,
    pub count_only: bool,
}

pub struct SelectBuilder<'a> {
    pub model: &'a ApiModel,
    pub entity: &'a EntitySchema,
    pub operation: &'a Operation,
    pub rule: &'a EffectiveRule,
    pub resolver: &'a PermissionResolver,
    pub dialect: Dialect,
    pub schema: Option<&'a str>,
    pub default_limit: Option<u64>,
}

impl<'a> SelectBuilder<'a> {
    pub fn build(&self) -> ApiResult<SelectPlan> {
        let op = self.operation;
        if !self.rule.allowed {
            return Err(ApiError::Forbidden(format!(
                "no read permission on entity '{}'",
                self.entity.name
            )));
        }

        // Split the requested projection into main properties and the
        // legacy nested `relation.property` include patterns.
        let mut main_request: Option<Vec<String>> = None;
        let mut include_request: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(requested) = op.requested_properties() {
            let mut main = Vec::new();
            for entry in requested {
                match entry.split_once('.') {
                    Some((relation, property)) => include_request
                        .entry(relation.to_string())
                        .or_default()
                        .push(property.to_string()),
                    None => main.push(entry),
                }
            }
            if !main.is_empty() {
                main_request = Some(main);
            }
        }

        let mut include_names: Vec<String> = op.includes();
        for name in include_request.keys() {
            if !include_names.iter().any(|n| n == name) {
                include_names.push(name.clone());
            }
        }

        let mut join_relations: Vec<&RelationDescriptor> = Vec::new();
        let mut array_relations: Vec<&RelationDescriptor> = Vec::new();
        for name in &include_names {
            let relation = self.entity.relations.get(name).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "unknown relation '{name}' on entity '{}'",
                    self.entity.name
                ))
            })?;
            match relation.kind {
                RelationKind::Object => join_relations.push(relation),
                RelationKind::Array => array_relations.push(relation),
            }
        }

        let qualify = !join_relations.is_empty();
        let alias = self.entity.name.as_str();
        let column_ref = |descriptor: &PropertyDescriptor| {
            if qualify {
                format!("{alias}.{}", descriptor.column)
            } else {
                descriptor.column.clone()
            }
        };

        // ── Main projection: requested ∩ permitted ──────────────────────
        let main_props: Vec<&PropertyDescriptor> = match &main_request {
            Some(names) => {
                let mut out = Vec::new();
                for name in names {
                    let descriptor = self.entity.property(name)?;
                    if self.rule.permits(name) {
                        out.push(descriptor);
                    }
                }
                out
            }
            None => self
                .entity
                .properties
                .values()
                .filter(|d| self.rule.permits(&d.name))
                .collect(),
        };
        if main_props.is_empty() {
            return Err(ApiError::Forbidden(format!(
                "no readable properties on entity '{}' for this caller",
                self.entity.name
            )));
        }

        let mut select_items = Vec::new();
        let mut columns = Vec::new();
        for descriptor in &main_props {
            let reference = column_ref(descriptor);
            if reference == descriptor.name {
                select_items.push(reference);
            } else {
                select_items.push(format!("{reference} AS {}", descriptor.name));
            }
            columns.push(SelectColumn::plain(&descriptor.name));
        }

        // ── Object relations: inner joins with prefixed projections ─────
        let mut joins = String::new();
        let mut related_rules = Vec::new();
        for relation in &join_relations {
            let related = self.model.entity(&relation.entity)?;
            let related_rule = self.resolver.resolve(related, Action::Read, &op.claims)?;
            if !related_rule.allowed {
                return Err(ApiError::Forbidden(format!(
                    "no read permission on related entity '{}'",
                    related.name
                )));
            }

            let wanted = include_request.get(&relation.name);
            let related_props: Vec<&PropertyDescriptor> = match wanted {
                Some(names) if !names.iter().any(|n| n == "*") => {
                    let mut out = Vec::new();
                    for name in names {
                        let descriptor = related.property(name)?;
                        if related_rule.permits(name) {
                            out.push(descriptor);
                        }
                    }
                    out
                }
                _ => related
                    .properties
                    .values()
                    .filter(|d| related_rule.permits(&d.name))
                    .collect(),
            };
            if related_props.is_empty() {
                return Err(ApiError::Forbidden(format!(
                    "no readable properties on related entity '{}' for this caller",
                    related.name
                )));
            }

            for descriptor in related_props {
                let alias_text = format!("{}.{}", relation.name, descriptor.name);
                select_items.push(format!(
                    "{}.{} AS {}",
                    relation.name,
                    descriptor.column,
                    self.dialect.quote(&alias_text)
                ));
                columns.push(SelectColumn {
                    alias: alias_text,
                    property: descriptor.name.clone(),
                    relation: Some(relation.name.clone()),
                    hidden: false,
                });
            }

            let parent = self.entity.property(&relation.parent_property)?;
            joins.push_str(&format!(
                " INNER JOIN {} {} ON {alias}.{} = {}.{}",
                related.qualified_table(self.schema),
                relation.name,
                parent.column,
                relation.name,
                related.key().column
            ));
            related_rules.push(related_rule);
        }

        // ── Array relations: plan the keyed follow-up queries ───────────
        let mut array_plans = Vec::new();
        for relation in &array_relations {
            let parent = self.entity.property(&relation.parent_property)?;
            let child_property = relation.child_property.clone().ok_or_else(|| {
                ApiError::Internal(format!(
                    "array relation '{}' has no child property",
                    relation.name
                ))
            })?;
            let parent_key_alias = if columns
                .iter()
                .any(|c| c.relation.is_none() && c.property == parent.name)
            {
                parent.name.clone()
            } else {
                // Select the key under a reserved alias and strip it later.
                let hidden_alias = format!("__{}", parent.name);
                select_items.push(format!("{} AS {hidden_alias}", column_ref(parent)));
                columns.push(SelectColumn {
                    alias: hidden_alias.clone(),
                    property: parent.name.clone(),
                    relation: None,
                    hidden: true,
                });
                hidden_alias
            };
            array_plans.push(ArrayRelationPlan {
                relation: relation.name.clone(),
                parent_key_alias,
                child_entity: relation.entity.clone(),
                child_property,
            });
        }

        // ── WHERE: user filters, then row filters, all conjoined ────────
        let mut params = ParamList::new(self.dialect);
        let mut conds = Vec::new();
        for (key, raw) in &op.query_params {
            let descriptor = self.entity.property(key)?;
            let filter = Filter::parse(key, raw)?;
            conds.push(filter.render(&column_ref(descriptor), descriptor, &mut params)?);
        }
        if let Some(cond) = render_row_filter(self.rule, &op.claims, &mut params)? {
            conds.push(cond);
        }
        for rule in &related_rules {
            if let Some(cond) = render_row_filter(rule, &op.claims, &mut params)? {
                conds.push(cond);
            }
        }
        let where_clause = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };

        let from = if qualify {
            format!("{} {alias}", self.entity.qualified_table(self.schema))
        } else {
            self.entity.qualified_table(self.schema)
        };

        if op.wants_count() {
            let sql = format!("SELECT COUNT(*) AS count FROM {from}{joins}{where_clause}");
            return Ok(SelectPlan {
                statement: Statement {
                    sql,
                    params: params.into_values(),
                },
                columns: vec![SelectColumn::plain("count")],
                array_relations: Vec::new(),
                count_only: true,
            });
        }

        // ── ORDER BY / LIMIT / OFFSET ───────────────────────────────────
        let mut order_clause = String::new();
        let sort_keys = op.sort()?;
        if !sort_keys.is_empty() {
            let mut rendered = Vec::with_capacity(sort_keys.len());
            for key in &sort_keys {
                let descriptor = self.entity.property(&key.property).map_err(|_| {
                    ApiError::BadRequest(format!("unknown sort column '{}'", key.property))
                })?;
                let direction = if key.ascending { "ASC" } else { "DESC" };
                rendered.push(format!("{} {direction}", column_ref(descriptor)));
            }
            order_clause = format!(" ORDER BY {}", rendered.join(", "));
        }

        let limit = op.limit()?.or(self.default_limit);
        let limit_clause = self.dialect.limit_clause(limit, op.offset()?);

        let sql = format!(
            "SELECT {} FROM {from}{joins}{where_clause}{order_clause}{limit_clause}",
            select_items.join(", ")
        );

        Ok(SelectPlan {
            statement: Statement {
                sql,
                params: params.into_values(),
            },
            columns,
            array_relations: array_plans,
            count_only: false,
        })
    }
}

/// Build the follow-up query for an array relation, keyed by the parent
/// rows' join keys.
///
/// The child FK is always selected (hidden when not permitted) so the DAO
/// can group rows under their parents.
pub fn build_child_select(
    child: &EntitySchema,
    child_rule: &EffectiveRule,
    child_property: &str,
    keys: &[sqlgate_core::SqlValue],
    claims: &sqlgate_core::Claims,
    dialect: Dialect,
    schema: Option<&str>,
) -> ApiResult<(Statement, Vec<SelectColumn>, String)> {
    if !child_rule.allowed {
        return Err(ApiError::Forbidden(format!(
            "no read permission on related entity '{}'",
            child.name
        )));
    }
    let props: Vec<&PropertyDescriptor> = child
        .properties
        .values()
        .filter(|d| child_rule.permits(&d.name))
        .collect();
    if props.is_empty() {
        return Err(ApiError::Forbidden(format!(
            "no readable properties on related entity '{}' for this caller",
            child.name
        )));
    }

    let fk = child.property(child_property)?;
    let mut select_items = Vec::new();
    let mut columns = Vec::new();
    for descriptor in &props {
        if descriptor.column == descriptor.name {
            select_items.push(descriptor.column.clone());
        } else {
            select_items.push(format!("{} AS {}", descriptor.column, descriptor.name));
        }
        columns.push(SelectColumn::plain(&descriptor.name));
    }
    let fk_alias = if props.iter().any(|d| d.name == fk.name) {
        fk.name.clone()
    } else {
        let hidden_alias = format!("__{}", fk.name);
        select_items.push(format!("{} AS {hidden_alias}", fk.column));
        columns.push(SelectColumn {
            alias: hidden_alias.clone(),
            property: fk.name.clone(),
            relation: None,
            hidden: true,
        });
        hidden_alias
    };

    let mut params = ParamList::new(dialect);
    let placeholders: Vec<String> = keys.iter().map(|k| params.bind(k.clone())).collect();
    let mut conds = vec![format!("{} IN ({})", fk.column, placeholders.join(", "))];
    if let Some(cond) = render_row_filter(child_rule, claims, &mut params)? {
        conds.push(cond);
    }

    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select_items.join(", "),
        child.qualified_table(schema),
        conds.join(" AND ")
    );

    Ok((
        Statement {
            sql,
            params: params.into_values(),
        },
        columns,
        fk_alias,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlgate_core::{Claims, SqlValue};
    use sqlgate_model::ApiModel;

    fn model() -> ApiModel {
        ApiModel::from_yaml(
            r#"
schema_objects:
  artist:
    database: chinook
    properties:
      artist_id: { type: integer, primary-key: auto }
      name: { type: string }
      scout_notes: { type: string }
    permissions:
      default:
        read: { sales_associate: "artist_id|name" }
  album:
    database: chinook
    properties:
      album_id: { type: integer, primary-key: auto }
      title: { type: string, max_length: 160 }
      artist_id: { type: integer }
      cost_basis: { type: number }
      artist: { type: object, ref: artist, parent-property: artist_id }
      tracks: { type: array, ref: track, parent-property: album_id, child-property: album_id }
    permissions:
      default:
        read:
          sales_associate: "album_id|title"
          catalog_manager: ".*"
  track:
    database: chinook
    properties:
      track_id: { type: integer, primary-key: auto }
      album_id: { type: integer }
      name: { type: string }
    permissions:
      default:
        read: { sales_associate: ".*" }
  account:
    database: main
    properties:
      id: { type: string, primary-key: manual }
      balance: { type: number }
    permissions:
      default:
        read:
          owner: { properties: ".*", where: "id = ${claims.sub}" }
"#,
        )
        .unwrap()
    }

    fn claims(roles: &[&str]) -> Claims {
        Claims::from_authorizer(&json!({"sub": "u-7", "roles": roles}))
    }

    fn build(model: &ApiModel, op: &Operation) -> ApiResult<SelectPlan> {
        let entity = model.entity(&op.entity)?;
        let resolver = PermissionResolver::new();
        let rule = resolver.resolve(entity, Action::Read, &op.claims)?;
        SelectBuilder {
            model,
            entity,
            operation: op,
            rule: &rule,
            resolver: &resolver,
            dialect: Dialect::Postgres,
            schema: None,
            default_limit: None,
        }
        .build()
    }

    #[test]
    fn filtered_sorted_limited_read() {
        let model = model();
        let mut op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("sort", "title:asc")
            .with_metadata("limit", "2");
        op.query_params.insert("artist_id".into(), json!("eq::1"));

        let plan = build(&model, &op).unwrap();
        assert_eq!(
            plan.statement.sql,
            "SELECT album_id, title FROM album WHERE artist_id = $1 ORDER BY title ASC LIMIT 2"
        );
        assert_eq!(plan.statement.params, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn projection_is_clipped_to_permitted_properties() {
        let model = model();
        let op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("properties", "album_id,title,cost_basis");
        let plan = build(&model, &op).unwrap();
        // cost_basis is outside the role's pattern and drops out.
        assert_eq!(plan.statement.sql, "SELECT album_id, title FROM album");
    }

    #[test]
    fn fully_forbidden_projection_fails() {
        let model = model();
        let op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("properties", "cost_basis");
        assert!(matches!(build(&model, &op), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn no_matching_role_is_forbidden() {
        let model = model();
        let op = Operation::new("album", Action::Read).with_claims(claims(&["stranger"]));
        assert!(matches!(build(&model, &op), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn object_relation_joins_and_prefixes() {
        let model = model();
        let op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("include", "artist");
        let plan = build(&model, &op).unwrap();
        assert_eq!(
            plan.statement.sql,
            "SELECT album.album_id, album.title, \
             artist.artist_id AS \"artist.artist_id\", artist.name AS \"artist.name\" \
             FROM album album INNER JOIN artist artist ON album.artist_id = artist.artist_id"
        );
        let nested: Vec<_> = plan
            .columns
            .iter()
            .filter(|c| c.relation.as_deref() == Some("artist"))
            .collect();
        // scout_notes is not permitted to the role and never projected.
        assert_eq!(nested.len(), 2);
    }

    #[test]
    fn array_relation_plans_keyed_followup() {
        let model = model();
        let op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("include", "tracks");
        let plan = build(&model, &op).unwrap();
        assert_eq!(plan.array_relations.len(), 1);
        let array = &plan.array_relations[0];
        assert_eq!(array.child_entity, "track");
        assert_eq!(array.child_property, "album_id");
        // album_id is projected, so the existing column keys the grouping.
        assert_eq!(array.parent_key_alias, "album_id");
        assert!(!plan.statement.sql.contains("__album_id"));
    }

    #[test]
    fn hidden_key_added_when_not_projected() {
        let model = model();
        let op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("properties", "title")
            .with_metadata("include", "tracks");
        let plan = build(&model, &op).unwrap();
        assert_eq!(plan.array_relations[0].parent_key_alias, "__album_id");
        assert!(plan.statement.sql.contains("album_id AS __album_id"));
        assert!(plan.columns.iter().any(|c| c.hidden));
    }

    #[test]
    fn claim_template_row_filter_binds_subject() {
        let model = model();
        let op = Operation::new("account", Action::Read).with_claims(claims(&["owner"]));
        let plan = build(&model, &op).unwrap();
        assert_eq!(
            plan.statement.sql,
            "SELECT balance, id FROM account WHERE id = $1"
        );
        assert_eq!(plan.statement.params, vec![SqlValue::Text("u-7".into())]);
    }

    #[test]
    fn unknown_sort_column_is_bad_request() {
        let model = model();
        let op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("sort", "velocity:asc");
        assert!(matches!(
            build(&model, &op),
            Err(ApiError::BadRequest(msg)) if msg.contains("velocity")
        ));
    }

    #[test]
    fn unknown_filter_property_is_bad_request() {
        let model = model();
        let mut op = Operation::new("album", Action::Read).with_claims(claims(&["sales_associate"]));
        op.query_params.insert("velocity".into(), json!("1"));
        assert!(matches!(build(&model, &op), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn count_replaces_projection_and_paging() {
        let model = model();
        let mut op = Operation::new("album", Action::Read)
            .with_claims(claims(&["sales_associate"]))
            .with_metadata("count", "true")
            .with_metadata("limit", "5");
        op.query_params.insert("artist_id".into(), json!("eq::1"));
        let plan = build(&model, &op).unwrap();
        assert_eq!(
            plan.statement.sql,
            "SELECT COUNT(*) AS count FROM album WHERE artist_id = $1"
        );
        assert!(plan.count_only);
    }

    #[test]
    fn default_page_size_applies_without_explicit_limit() {
        let model = model();
        let entity = model.entity("album").unwrap();
        let resolver = PermissionResolver::new();
        let op = Operation::new("album", Action::Read).with_claims(claims(&["sales_associate"]));
        let rule = resolver.resolve(entity, Action::Read, &op.claims).unwrap();
        let plan = SelectBuilder {
            model: &model,
            entity,
            operation: &op,
            rule: &rule,
            resolver: &resolver,
            dialect: Dialect::Postgres,
            schema: None,
            default_limit: Some(50),
        }
        .build()
        .unwrap();
        assert!(plan.statement.sql.ends_with("LIMIT 50"));
    }

    #[test]
    fn child_select_applies_row_filter_and_in_keys() {
        let model = model();
        let child = model.entity("track").unwrap();
        let resolver = PermissionResolver::new();
        let claims = claims(&["sales_associate"]);
        let rule = resolver.resolve(child, Action::Read, &claims).unwrap();
        let (statement, columns, fk_alias) = build_child_select(
            child,
            &rule,
            "album_id",
            &[SqlValue::Int(1), SqlValue::Int(2)],
            &claims,
            Dialect::Postgres,
            None,
        )
        .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT album_id, name, track_id FROM track WHERE album_id IN ($1, $2)"
        );
        assert_eq!(fk_alias, "album_id");
        assert_eq!(columns.len(), 3);
    }
}
