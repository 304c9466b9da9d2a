//! Parser for the declarative spec document.
//!
//! The document is an object tree with top-level `schema_objects` and
//! `path_operations` maps. Entity extensions: `database`, `table`,
//! `concurrency-control`, `permissions`, and per-property `primary-key`,
//! `parent-property`, `child-property`. All violations fail with
//! `ApiError::Spec` before the model is installed.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use sqlgate_core::{ApiError, ApiResult};

use crate::schema::{
    ApiModel, CustomOperation, EntitySchema, InputSpec, KeyStrategy, PermissionTable,
    PropertyDescriptor, PropertyType, RelationDescriptor, RelationKind, Rule,
};

fn as_object<'a>(value: &'a Value, context: &str) -> ApiResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ApiError::Spec(format!("{context} must be an object")))
}

fn as_str<'a>(value: &'a Value, context: &str) -> ApiResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ApiError::Spec(format!("{context} must be a string")))
}

pub(crate) fn parse_model(tree: &Value) -> ApiResult<ApiModel> {
    let root = as_object(tree, "spec document")?;

    let mut entities = BTreeMap::new();
    if let Some(objects) = root.get("schema_objects") {
        for (name, spec) in as_object(objects, "schema_objects")? {
            entities.insert(name.clone(), parse_entity(name, spec)?);
        }
    }

    let mut operations = BTreeMap::new();
    if let Some(paths) = root.get("path_operations") {
        for (name, spec) in as_object(paths, "path_operations")? {
            operations.insert(name.clone(), parse_operation(name, spec)?);
        }
    }

    let model = ApiModel {
        entities,
        operations,
    };
    validate_relations(&model)?;
    Ok(model)
}

fn parse_entity(name: &str, spec: &Value) -> ApiResult<EntitySchema> {
    let obj = as_object(spec, &format!("entity '{name}'"))?;

    let database = obj
        .get("database")
        .map(|v| as_str(v, &format!("entity '{name}' database")).map(String::from))
        .transpose()?
        .ok_or_else(|| ApiError::Spec(format!("entity '{name}' is missing 'database'")))?;

    let table = match obj.get("table") {
        Some(v) => as_str(v, &format!("entity '{name}' table"))?.to_string(),
        None => name.to_string(),
    };

    let props_spec = obj
        .get("properties")
        .ok_or_else(|| ApiError::Spec(format!("entity '{name}' has no properties")))?;

    let mut properties = BTreeMap::new();
    let mut relations = BTreeMap::new();
    let mut key: Option<(String, KeyStrategy)> = None;

    for (prop_name, prop_spec) in as_object(props_spec, &format!("entity '{name}' properties"))? {
        let context = format!("property '{name}.{prop_name}'");
        let prop_obj = as_object(prop_spec, &context)?;
        let type_name = prop_obj
            .get("type")
            .map(|v| as_str(v, &format!("{context} type")))
            .transpose()?
            .ok_or_else(|| ApiError::Spec(format!("{context} is missing 'type'")))?;

        if type_name == "object" || type_name == "array" {
            relations.insert(
                prop_name.clone(),
                parse_relation(&context, prop_name, type_name, prop_obj)?,
            );
            continue;
        }

        let property_type = PropertyType::from_spec(type_name)
            .ok_or_else(|| ApiError::Spec(format!("{context} has unknown type '{type_name}'")))?;

        let is_key = match prop_obj.get("primary-key") {
            None => false,
            Some(v) => {
                let strategy_name = as_str(v, &format!("{context} primary-key"))?;
                let strategy = KeyStrategy::from_spec(strategy_name).ok_or_else(|| {
                    ApiError::Spec(format!(
                        "{context} has unknown key strategy '{strategy_name}'"
                    ))
                })?;
                if let Some((existing, _)) = &key {
                    return Err(ApiError::Spec(format!(
                        "entity '{name}' declares more than one primary key ('{existing}' and '{prop_name}')"
                    )));
                }
                key = Some((prop_name.clone(), strategy));
                true
            }
        };

        let max_length = match prop_obj.get("max_length") {
            None => None,
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| ApiError::Spec(format!("{context} max_length must be an integer")))?
                    as usize,
            ),
        };

        properties.insert(
            prop_name.clone(),
            PropertyDescriptor {
                name: prop_name.clone(),
                column: match prop_obj.get("column") {
                    Some(v) => as_str(v, &format!("{context} column"))?.to_string(),
                    None => prop_name.clone(),
                },
                property_type,
                max_length,
                required: prop_obj
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                is_key,
                is_concurrency: false,
            },
        );
    }

    let (key_property, key_strategy) = key
        .ok_or_else(|| ApiError::Spec(format!("entity '{name}' declares no primary key")))?;

    let concurrency_property = match obj.get("concurrency-control") {
        None => None,
        Some(v) => {
            let prop = as_str(v, &format!("entity '{name}' concurrency-control"))?;
            let descriptor = properties.get_mut(prop).ok_or_else(|| {
                ApiError::Spec(format!(
                    "entity '{name}' concurrency-control names unknown property '{prop}'"
                ))
            })?;
            descriptor.is_concurrency = true;
            Some(prop.to_string())
        }
    };

    let permissions = match obj.get("permissions") {
        None => PermissionTable::default(),
        Some(v) => parse_permissions(name, v)?,
    };

    Ok(EntitySchema {
        name: name.to_string(),
        database,
        table,
        key_property,
        key_strategy,
        concurrency_property,
        properties,
        relations,
        permissions,
    })
}

fn parse_relation(
    context: &str,
    prop_name: &str,
    type_name: &str,
    spec: &Map<String, Value>,
) -> ApiResult<RelationDescriptor> {
    let kind = if type_name == "object" {
        RelationKind::Object
    } else {
        RelationKind::Array
    };

    let entity = spec
        .get("ref")
        .map(|v| as_str(v, &format!("{context} ref")))
        .transpose()?
        .ok_or_else(|| ApiError::Spec(format!("{context} is missing 'ref'")))?;

    let parent_property = spec
        .get("parent-property")
        .map(|v| as_str(v, &format!("{context} parent-property")))
        .transpose()?
        .ok_or_else(|| ApiError::Spec(format!("{context} is missing 'parent-property'")))?;

    let child_property = spec
        .get("child-property")
        .map(|v| as_str(v, &format!("{context} child-property")).map(String::from))
        .transpose()?;

    if kind == RelationKind::Array && child_property.is_none() {
        return Err(ApiError::Spec(format!(
            "{context} is an array relation and must declare 'child-property'"
        )));
    }

    Ok(RelationDescriptor {
        name: prop_name.to_string(),
        kind,
        entity: entity.to_string(),
        parent_property: parent_property.to_string(),
        child_property,
    })
}

/// Normalize a permission action name; `create`/`update` collapse to
/// `write`.
fn normalize_action(entity: &str, action: &str) -> ApiResult<&'static str> {
    match action {
        "read" => Ok("read"),
        "write" | "create" | "update" => Ok("write"),
        "delete" => Ok("delete"),
        other => Err(ApiError::Spec(format!(
            "entity '{entity}' permissions use unknown action '{other}'"
        ))),
    }
}

fn parse_permissions(entity: &str, spec: &Value) -> ApiResult<PermissionTable> {
    let mut providers: HashMap<String, HashMap<String, HashMap<String, Rule>>> = HashMap::new();

    for (provider, actions) in as_object(spec, &format!("entity '{entity}' permissions"))? {
        let action_map = as_object(actions, &format!("permissions provider '{provider}'"))?;
        for (action, roles) in action_map {
            let normalized = normalize_action(entity, action)?;
            let role_map = as_object(roles, &format!("permissions action '{action}'"))?;
            for (role, rule_spec) in role_map {
                let rule = parse_rule(entity, role, normalized, rule_spec)?;
                providers
                    .entry(provider.clone())
                    .or_default()
                    .entry(normalized.to_string())
                    .or_default()
                    .insert(role.clone(), rule);
            }
        }
    }

    Ok(PermissionTable { providers })
}

fn parse_rule(entity: &str, role: &str, action: &str, spec: &Value) -> ApiResult<Rule> {
    let rule = match spec {
        // Concise regex form.
        Value::String(pattern) => Rule {
            allow: true,
            properties: Some(pattern.clone()),
            where_template: None,
        },
        // Concise allow form. For non-delete actions an allow grants all
        // properties.
        Value::Bool(allow) => Rule {
            allow: *allow,
            properties: (*allow && action != "delete").then(|| ".*".to_string()),
            where_template: None,
        },
        Value::Object(obj) => Rule {
            allow: obj.get("allow").and_then(Value::as_bool).unwrap_or(true),
            properties: obj
                .get("properties")
                .map(|v| as_str(v, "rule 'properties'").map(String::from))
                .transpose()?,
            where_template: obj
                .get("where")
                .map(|v| as_str(v, "rule 'where'").map(String::from))
                .transpose()?,
        },
        _ => {
            return Err(ApiError::Spec(format!(
                "entity '{entity}' rule for role '{role}' must be a regex, a boolean, or an object"
            )))
        }
    };

    if let Some(pattern) = &rule.properties {
        regex::Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            ApiError::Spec(format!(
                "entity '{entity}' role '{role}' property pattern does not compile: {e}"
            ))
        })?;
    }

    Ok(rule)
}

fn parse_operation(name: &str, spec: &Value) -> ApiResult<CustomOperation> {
    let obj = as_object(spec, &format!("path operation '{name}'"))?;

    let sql = obj
        .get("sql")
        .map(|v| as_str(v, &format!("path operation '{name}' sql")))
        .transpose()?
        .ok_or_else(|| ApiError::Spec(format!("path operation '{name}' is missing 'sql'")))?;

    let mut inputs = BTreeMap::new();
    if let Some(inputs_spec) = obj.get("inputs") {
        for (input, input_spec) in as_object(inputs_spec, &format!("operation '{name}' inputs"))? {
            let input_obj = as_object(input_spec, &format!("input '{name}.{input}'"))?;
            inputs.insert(
                input.clone(),
                InputSpec {
                    required: input_obj
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    default: input_obj.get("default").cloned(),
                },
            );
        }
    }

    let mut outputs = BTreeMap::new();
    if let Some(outputs_spec) = obj.get("outputs") {
        for (column, field) in as_object(outputs_spec, &format!("operation '{name}' outputs"))? {
            outputs.insert(
                column.clone(),
                as_str(field, &format!("output '{name}.{column}'"))?.to_string(),
            );
        }
    }

    Ok(CustomOperation {
        name: name.to_string(),
        sql: sql.to_string(),
        inputs,
        outputs,
    })
}

/// Cross-entity validation: every relation points at a declared entity,
/// the parent property exists on the owning entity, and the child property
/// exists on the referenced entity.
fn validate_relations(model: &ApiModel) -> ApiResult<()> {
    for entity in model.entities.values() {
        for relation in entity.relations.values() {
            let context = format!("relation '{}.{}'", entity.name, relation.name);

            let referenced = model.entities.get(&relation.entity).ok_or_else(|| {
                ApiError::Spec(format!(
                    "{context} references unknown entity '{}'",
                    relation.entity
                ))
            })?;

            if !entity.properties.contains_key(&relation.parent_property) {
                return Err(ApiError::Spec(format!(
                    "{context} parent-property '{}' does not exist on '{}'",
                    relation.parent_property, entity.name
                )));
            }

            if let Some(child) = &relation.child_property {
                if !referenced.properties.contains_key(child) {
                    return Err(ApiError::Spec(format!(
                        "{context} child-property '{child}' does not exist on '{}'",
                        referenced.name
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chinook() -> &'static str {
        r#"
schema_objects:
  artist:
    database: chinook
    properties:
      artist_id: { type: integer, primary-key: auto }
      name: { type: string, max_length: 120 }
    permissions:
      default:
        read: { sales_associate: ".*" }
  album:
    database: chinook
    properties:
      album_id: { type: integer, primary-key: auto }
      title: { type: string, max_length: 160, required: true }
      artist_id: { type: integer }
      artist: { type: object, ref: artist, parent-property: artist_id }
    permissions:
      default:
        read: { sales_associate: "album_id|title" }
        write: { manager: ".*" }
        delete: { manager: true }
path_operations:
  top_albums:
    sql: "SELECT title, COUNT(*) AS sales FROM album WHERE artist_id = :artist_id"
    inputs:
      artist_id: { required: true }
    outputs:
      sales: total_sales
"#
    }

    #[test]
    fn loads_a_document_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(chinook().as_bytes()).unwrap();
        let document = std::fs::read_to_string(file.path()).unwrap();

        let model = ApiModel::from_yaml(&document).unwrap();
        assert!(model.entities.contains_key("album"));
        assert!(model.entities.contains_key("artist"));
    }

    #[test]
    fn parses_a_complete_document() {
        let model = ApiModel::from_yaml(chinook()).unwrap();
        let album = model.entity("album").unwrap();
        assert_eq!(album.table, "album");
        assert_eq!(album.key_property, "album_id");
        assert_eq!(album.key_strategy, KeyStrategy::Auto);
        assert_eq!(album.relations["artist"].entity, "artist");
        assert_eq!(album.properties["title"].max_length, Some(160));
        assert!(album.properties["title"].required);
        assert!(model.operations.contains_key("top_albums"));
    }

    #[test]
    fn write_rules_collapse_create_and_update() {
        let doc = r#"
schema_objects:
  note:
    database: main
    properties:
      id: { type: integer, primary-key: auto }
      body: { type: string }
    permissions:
      default:
        create: { editor: "body" }
"#;
        let model = ApiModel::from_yaml(doc).unwrap();
        let note = model.entity("note").unwrap();
        assert!(note.permissions.rules_for("default", "write").is_some());
        assert!(note.permissions.rules_for("default", "create").is_none());
    }

    #[test]
    fn rejects_unknown_relation_target() {
        let doc = r#"
schema_objects:
  album:
    database: chinook
    properties:
      album_id: { type: integer, primary-key: auto }
      artist_id: { type: integer }
      artist: { type: object, ref: nobody, parent-property: artist_id }
"#;
        let err = ApiModel::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ApiError::Spec(msg) if msg.contains("nobody")));
    }

    #[test]
    fn rejects_duplicate_primary_keys() {
        let doc = r#"
schema_objects:
  album:
    database: chinook
    properties:
      a: { type: integer, primary-key: auto }
      b: { type: integer, primary-key: auto }
"#;
        let err = ApiModel::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ApiError::Spec(msg) if msg.contains("more than one primary key")));
    }

    #[test]
    fn rejects_uncompilable_permission_regex() {
        let doc = r#"
schema_objects:
  album:
    database: chinook
    properties:
      album_id: { type: integer, primary-key: auto }
    permissions:
      default:
        read: { broken: "(" }
"#;
        let err = ApiModel::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ApiError::Spec(msg) if msg.contains("does not compile")));
    }

    #[test]
    fn rejects_dangling_concurrency_property() {
        let doc = r#"
schema_objects:
  invoice:
    database: chinook
    concurrency-control: last_updated
    properties:
      invoice_id: { type: integer, primary-key: auto }
"#;
        let err = ApiModel::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ApiError::Spec(msg) if msg.contains("last_updated")));
    }

    #[test]
    fn array_relation_requires_child_property() {
        let doc = r#"
schema_objects:
  invoice:
    database: chinook
    properties:
      invoice_id: { type: integer, primary-key: auto }
      lines: { type: array, ref: invoice, parent-property: invoice_id }
"#;
        let err = ApiModel::from_yaml(doc).unwrap_err();
        assert!(matches!(err, ApiError::Spec(msg) if msg.contains("child-property")));
    }
}
