//! Path-based scope enforcement.
//!
//! When enabled, a request is authorized iff one of the caller's scope
//! tokens covers the operation (`<action>:<entity>`, `<action>:*`,
//! `*:*`, `*`) or a permission token matches it (`<entity>.<action>`,
//! `<entity>.*`). Scope actions are hierarchical: `admin` covers
//! everything, `delete` covers writes and reads, `write` covers reads.
//! This check is additive; the permission tables still govern projection
//! and row filtering.

use sqlgate_core::{Action, ApiError, ApiResult, Operation};

/// Hierarchy rank of a scope action token.
fn rank(action: &str) -> Option<u8> {
    match action {
        "read" => Some(1),
        "write" | "create" | "update" => Some(2),
        "delete" => Some(3),
        "admin" | "*" => Some(4),
        _ => None,
    }
}

fn required_rank(action: Action) -> u8 {
    match action {
        Action::Read | Action::Custom => 1,
        Action::Create | Action::Update | Action::Batch => 2,
        Action::Delete => 3,
    }
}

pub fn check_scope(operation: &Operation) -> ApiResult<()> {
    let claims = &operation.claims;
    if claims.is_anonymous() {
        return Err(ApiError::Unauthorized("missing claims".into()));
    }

    let needed = required_rank(operation.action);
    let entity = operation.entity.as_str();

    for token in claims.scope_tokens() {
        match token.split_once(':') {
            None if token == "*" => return Ok(()),
            Some((action, target)) if target == entity || target == "*" => {
                if rank(action).is_some_and(|r| r >= needed) {
                    return Ok(());
                }
            }
            _ => {}
        }
    }

    let action_name = operation.action.as_str();
    let normalized = operation.action.permission_action();
    for token in &claims.permissions {
        if let Some((target, action)) = token.split_once('.') {
            if target == entity && (action == "*" || action == action_name || action == normalized)
            {
                return Ok(());
            }
        }
    }

    Err(ApiError::Forbidden(format!(
        "scope does not cover {action_name} on '{entity}'"
    )))
}
