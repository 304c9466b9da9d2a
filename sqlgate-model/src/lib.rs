//! # sqlgate-model — parsed API model and permission resolution
//!
//! The declarative spec document (an OpenAPI-like object tree with
//! `schema_objects` and `path_operations`) is parsed once per process into
//! an immutable [`ApiModel`]: entity schemas with database bindings,
//! property descriptors, relation descriptors, permission tables, and
//! named path operations. Every request consults this model.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ApiModel`] | Immutable snapshot of all entities and path operations |
//! | [`EntitySchema`] | One entity: table binding, key, properties, relations, permissions |
//! | [`PermissionResolver`] | (entity, action, claims) -> cached [`EffectiveRule`] |
//! | [`ModelRegistry`] | Process-wide atomic snapshot holder for hot reload |
//!
//! Load-time validation is strict: unknown referenced entities, dangling
//! relation properties, uncompilable permission regexes, a missing or
//! duplicated primary key, or a dangling concurrency property all fail
//! with `ApiError::Spec` before the model is installed.

pub mod permissions;
pub mod registry;
pub mod schema;
mod spec;

pub use permissions::{EffectiveRule, PermissionResolver, DEFAULT_PROVIDER};
pub use registry::ModelRegistry;
pub use schema::{
    ApiModel, CustomOperation, EntitySchema, InputSpec, KeyStrategy, PermissionTable,
    PropertyDescriptor, PropertyType, RelationDescriptor, RelationKind, Rule,
};
