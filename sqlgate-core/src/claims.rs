use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller identity lifted from a validated token's claims.
///
/// Token validation itself happens upstream (the gateway authorizer); by
/// the time an event reaches this crate the claims are trusted input. The
/// common claims are lifted into typed fields, and the full claim tree is
/// kept in `raw` so row-filter templates can reference arbitrary
/// provider-specific keys by dotted path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Subject claim ("sub") - unique caller identifier.
    pub sub: String,

    /// Roles extracted from the claims.
    pub roles: Vec<String>,

    /// OAuth-style scope string, if present.
    pub scope: Option<String>,

    /// Flat permission tokens (`entity.action`), if present.
    pub permissions: Vec<String>,

    /// Raw claim tree for dotted-path access.
    pub raw: Value,
}

/// Read a claim that may be a JSON array of strings or a single delimited
/// string. Gateway authorizers stringify list claims, so both shapes occur
/// in the wild.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s
            .split([',', ' '])
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

impl Claims {
    /// Build claims from a gateway authorizer map.
    ///
    /// Missing keys produce an empty (anonymous) identity; the permission
    /// resolver then denies by default.
    pub fn from_authorizer(authorizer: &Value) -> Self {
        let sub = authorizer
            .get("sub")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let scope = authorizer
            .get("scope")
            .and_then(|v| v.as_str())
            .map(String::from);

        Claims {
            sub,
            roles: string_list(authorizer.get("roles")),
            scope,
            permissions: string_list(authorizer.get("permissions")),
            raw: authorizer.clone(),
        }
    }

    /// Look up a claim by dotted path, e.g. `"sub"` or `"tenant.id"`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = &self.raw;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Individual scope tokens (whitespace-delimited per RFC 6749).
    pub fn scope_tokens(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Whether any identifying claim is present at all.
    pub fn is_anonymous(&self) -> bool {
        self.sub.is_empty() && self.roles.is_empty() && self.scope.is_none()
    }
}
