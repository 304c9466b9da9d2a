//! # sqlgate — specification-driven SQL query gateway
//!
//! Given a declarative API model annotated with database-binding,
//! permission, and relationship metadata, sqlgate translates gateway
//! requests against declared entities into parameterized SQL, enforces
//! field- and row-level access control, and composes multi-operation
//! batches transactionally.
//!
//! The workspace splits along the request path:
//!
//! | Crate | Concern |
//! |-------|---------|
//! | `sqlgate-core` | Errors, bind values, claims, the canonical operation |
//! | `sqlgate-model` | Parsed API model, permission resolution, registry |
//! | `sqlgate-sql` | Dialects and per-action statement builders |
//! | `sqlgate-db` | The opaque connection capability and the operation DAO |
//! | `sqlgate-batch` | Reference substitution, dependency planning, orchestration |
//! | `sqlgate-http` | Gateway event adapter, scope guard, service pipeline |
//!
//! This facade re-exports the public surface.
//!
//! ```ignore
//! use sqlgate::{ApiModel, GatewayConfig, GatewayService};
//!
//! let model = Arc::new(ApiModel::from_yaml(&spec_document)?);
//! let config = GatewayConfig::from_env()?;
//! let service = GatewayService::new(model, config, pool);
//! let response = service.handle(event).await;
//! ```

pub use sqlgate_batch::{
    BatchOptions, BatchOrchestrator, BatchOutcome, BatchRequest, OperationRecord, OperationSpec,
};
pub use sqlgate_core::{
    Action, ApiError, ApiResult, Claims, ConfigError, DbEngine, GatewayConfig, Operation,
    SecretStore, SqlValue,
};
pub use sqlgate_db::{Connection, ConnectionProvider, OperationDao, OperationExecutor, QueryOutput};
pub use sqlgate_http::{GatewayEvent, GatewayResponse, GatewayService, RequestContext};
pub use sqlgate_model::{ApiModel, EntitySchema, ModelRegistry, PermissionResolver};
pub use sqlgate_sql::{Dialect, Statement};
