use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use sqlgate_core::{Action, ApiError, ApiResult, Claims};

use crate::schema::EntitySchema;

/// Permission provider consulted for request claims.
pub const DEFAULT_PROVIDER: &str = "default";

/// The per-request projection of an entity's permission table onto the
/// caller's role set.
///
/// Properties are permitted if they match the union of the role regexes;
/// row filtering is the OR of the role `where` templates, and a single
/// permissive role without a template drops row filtering entirely for
/// the action.
#[derive(Debug)]
pub struct EffectiveRule {
    pub allowed: bool,
    /// Compiled union regex; `None` when no role contributed a property
    /// pattern (allow-only rules).
    properties: Option<Regex>,
    /// True when some role grants the action without a row filter.
    pub unconditional: bool,
    /// Row-filter templates to OR together when `unconditional` is false.
    pub where_templates: Vec<String>,
}

impl EffectiveRule {
    pub fn denied() -> EffectiveRule {
        EffectiveRule {
            allowed: false,
            properties: None,
            unconditional: false,
            where_templates: Vec::new(),
        }
    }

    /// Whether the caller may see or write the given property.
    pub fn permits(&self, property: &str) -> bool {
        match &self.properties {
            Some(regex) => self.allowed && regex.is_match(property),
            None => false,
        }
    }

    /// Whether row filtering applies to this action at all.
    pub fn has_row_filter(&self) -> bool {
        !self.unconditional && !self.where_templates.is_empty()
    }
}

type CacheKey = (String, &'static str, String);

/// Resolves and caches effective rules.
///
/// The cache key is (entity, normalized action, sorted role set); the
/// union regex is compiled once per distinct key. A resolver is built per
/// model snapshot, so a hot reload starts from an empty cache.
#[derive(Debug, Default)]
pub struct PermissionResolver {
    cache: DashMap<CacheKey, Arc<EffectiveRule>>,
}

impl PermissionResolver {
    pub fn new() -> PermissionResolver {
        PermissionResolver {
            cache: DashMap::new(),
        }
    }

    pub fn resolve(
        &self,
        entity: &EntitySchema,
        action: Action,
        claims: &Claims,
    ) -> ApiResult<Arc<EffectiveRule>> {
        let perm_action = action.permission_action();

        let mut roles: Vec<&str> = claims.roles.iter().map(String::as_str).collect();
        roles.sort_unstable();
        roles.dedup();
        let key: CacheKey = (entity.name.clone(), perm_action, roles.join(","));

        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let rule = Arc::new(Self::build(entity, perm_action, &roles)?);
        self.cache.insert(key, rule.clone());
        Ok(rule)
    }

    fn build(
        entity: &EntitySchema,
        perm_action: &'static str,
        roles: &[&str],
    ) -> ApiResult<EffectiveRule> {
        let Some(role_rules) = entity.permissions.rules_for(DEFAULT_PROVIDER, perm_action) else {
            return Ok(EffectiveRule::denied());
        };

        let matched: Vec<_> = roles.iter().filter_map(|r| role_rules.get(*r)).collect();
        if matched.is_empty() {
            tracing::debug!(
                entity = %entity.name,
                action = perm_action,
                "no permission rule matches the caller's roles"
            );
            return Ok(EffectiveRule::denied());
        }

        let allowed = matched.iter().any(|r| r.allow);

        let patterns: Vec<&str> = matched
            .iter()
            .filter(|r| r.allow)
            .filter_map(|r| r.properties.as_deref())
            .collect();
        let properties = if patterns.is_empty() {
            None
        } else {
            // Each alternative keeps its own group so pattern-internal `|`
            // stays scoped.
            let union = patterns
                .iter()
                .map(|p| format!("(?:{p})"))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                Regex::new(&format!("^(?:{union})$"))
                    .map_err(|e| ApiError::Internal(format!("permission regex union: {e}")))?,
            )
        };

        let unconditional = matched
            .iter()
            .any(|r| r.allow && r.where_template.is_none());
        let where_templates = if unconditional {
            Vec::new()
        } else {
            matched
                .iter()
                .filter(|r| r.allow)
                .filter_map(|r| r.where_template.clone())
                .collect()
        };

        Ok(EffectiveRule {
            allowed,
            properties,
            unconditional,
            where_templates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ApiModel;
    use sqlgate_core::Claims;

    fn model() -> ApiModel {
        ApiModel::from_yaml(
            r#"
schema_objects:
  account:
    database: main
    properties:
      id: { type: string, primary-key: manual }
      balance: { type: number }
      owner_notes: { type: string }
    permissions:
      default:
        read:
          viewer: { properties: "id|balance", where: "id = ${claims.sub}" }
          auditor: ".*"
        write:
          teller: "balance"
        delete:
          admin: true
"#,
        )
        .unwrap()
    }

    fn claims_with_roles(roles: &[&str]) -> Claims {
        Claims {
            sub: "u-1".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Claims::default()
        }
    }

    #[test]
    fn no_matching_role_denies() {
        let model = model();
        let resolver = PermissionResolver::new();
        let rule = resolver
            .resolve(
                model.entity("account").unwrap(),
                Action::Read,
                &claims_with_roles(&["stranger"]),
            )
            .unwrap();
        assert!(!rule.allowed);
        assert!(!rule.permits("id"));
    }

    #[test]
    fn properties_union_across_roles() {
        let model = model();
        let resolver = PermissionResolver::new();
        let entity = model.entity("account").unwrap();

        let viewer = resolver
            .resolve(entity, Action::Read, &claims_with_roles(&["viewer"]))
            .unwrap();
        assert!(viewer.permits("balance"));
        assert!(!viewer.permits("owner_notes"));

        let both = resolver
            .resolve(entity, Action::Read, &claims_with_roles(&["viewer", "auditor"]))
            .unwrap();
        assert!(both.permits("owner_notes"));
    }

    #[test]
    fn permissive_role_without_where_drops_row_filter() {
        let model = model();
        let resolver = PermissionResolver::new();
        let entity = model.entity("account").unwrap();

        let viewer = resolver
            .resolve(entity, Action::Read, &claims_with_roles(&["viewer"]))
            .unwrap();
        assert!(viewer.has_row_filter());
        assert_eq!(viewer.where_templates, vec!["id = ${claims.sub}"]);

        let both = resolver
            .resolve(entity, Action::Read, &claims_with_roles(&["viewer", "auditor"]))
            .unwrap();
        assert!(!both.has_row_filter());
    }

    #[test]
    fn delete_allow_flag_ors_across_roles() {
        let model = model();
        let resolver = PermissionResolver::new();
        let entity = model.entity("account").unwrap();

        let admin = resolver
            .resolve(entity, Action::Delete, &claims_with_roles(&["admin", "viewer"]))
            .unwrap();
        assert!(admin.allowed);

        let viewer = resolver
            .resolve(entity, Action::Delete, &claims_with_roles(&["viewer"]))
            .unwrap();
        assert!(!viewer.allowed);
    }

    #[test]
    fn update_resolves_through_write_rules() {
        let model = model();
        let resolver = PermissionResolver::new();
        let entity = model.entity("account").unwrap();
        let rule = resolver
            .resolve(entity, Action::Update, &claims_with_roles(&["teller"]))
            .unwrap();
        assert!(rule.allowed);
        assert!(rule.permits("balance"));
        assert!(!rule.permits("id"));
    }

    #[test]
    fn cache_is_keyed_by_role_set_not_order() {
        let model = model();
        let resolver = PermissionResolver::new();
        let entity = model.entity("account").unwrap();
        resolver
            .resolve(entity, Action::Read, &claims_with_roles(&["viewer", "auditor"]))
            .unwrap();
        resolver
            .resolve(entity, Action::Read, &claims_with_roles(&["auditor", "viewer"]))
            .unwrap();
        assert_eq!(resolver.cache.len(), 1);
    }
}
