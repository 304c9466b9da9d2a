//! The service pipeline: adapter -> guard -> transaction -> DAO or batch
//! orchestrator -> adapter.

use std::sync::Arc;

use serde_json::Value;
use sqlgate_batch::{BatchOrchestrator, BatchRequest};
use sqlgate_core::{Action, ApiError, ApiResult, GatewayConfig, Operation};
use sqlgate_db::{Connection, ConnectionProvider, OperationDao, OperationExecutor};
use sqlgate_model::ApiModel;

use crate::adapter;
use crate::event::{GatewayEvent, GatewayResponse};
use crate::scope;

/// Entry point wiring one request end to end.
///
/// Each request gets its own connection from the provider and owns it
/// exclusively for its lifetime. Single operations run inside a
/// begin/commit-or-rollback bracket here; a batch manages its own
/// transaction in the orchestrator.
pub struct GatewayService<P: ConnectionProvider> {
    config: GatewayConfig,
    dao: OperationDao,
    provider: P,
}

impl<P: ConnectionProvider> GatewayService<P> {
    pub fn new(model: Arc<ApiModel>, config: GatewayConfig, provider: P) -> GatewayService<P> {
        let dao = OperationDao::new(model, &config);
        GatewayService {
            config,
            dao,
            provider,
        }
    }

    pub async fn handle(&self, event: GatewayEvent) -> GatewayResponse {
        let result = self.process(&event).await;
        adapter::marshal(result, self.config.camel_case)
    }

    async fn process(&self, event: &GatewayEvent) -> ApiResult<Value> {
        let operation = adapter::unmarshal(event, self.config.camel_case)?;
        if self.config.scope_check {
            scope::check_scope(&operation)?;
        }

        let mut conn = self.provider.connect().await?;
        let result = self.dispatch(conn.as_mut(), &operation).await;
        if let Err(err) = conn.close().await {
            tracing::warn!(error = %err, "closing the connection failed");
        }
        result
    }

    async fn dispatch(&self, conn: &mut dyn Connection, operation: &Operation) -> ApiResult<Value> {
        if operation.action == Action::Batch {
            let request = BatchRequest::from_value(Value::Object(operation.store_params.clone()))?;
            let outcome = BatchOrchestrator::new(&self.dao)
                .execute(conn, request, &operation.claims)
                .await?;
            return serde_json::to_value(outcome).map_err(ApiError::internal);
        }

        conn.begin().await?;
        match self.dao.execute(conn, operation).await {
            Ok(value) => {
                conn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = conn.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
