//! # sqlgate-core — shared types for the sqlgate query gateway
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//! the error type, the bind-parameter value type, the caller's claims,
//! the canonical [`Operation`] intermediate form, and environment
//! configuration.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ApiError`] | Error enum with an HTTP-equivalent status code per kind |
//! | [`SqlValue`] | Typed bind parameter (`Null`, `Bool`, `Int`, `Float`, `Text`) |
//! | [`Claims`] | Caller identity: subject, roles, scope, raw claim tree |
//! | [`Operation`] | Canonical (entity, action, params, claims) request form |
//! | [`GatewayConfig`] | Environment-driven configuration (`DB_ENGINE`, ...) |
//!
//! Higher layers (`sqlgate-model`, `sqlgate-sql`, `sqlgate-db`,
//! `sqlgate-batch`, `sqlgate-http`) all depend on this crate and nothing
//! here depends on them.

pub mod claims;
pub mod config;
pub mod error;
pub mod operation;
pub mod value;

pub use claims::Claims;
pub use config::{ConfigError, DbEngine, GatewayConfig, SecretStore};
pub use error::{ApiError, ApiResult};
pub use operation::{Action, Operation};
pub use value::SqlValue;

/// Re-exports of the most commonly used core types.
pub mod prelude {
    pub use crate::{Action, ApiError, ApiResult, Claims, GatewayConfig, Operation, SqlValue};
}
