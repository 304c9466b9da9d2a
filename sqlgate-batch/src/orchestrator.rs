//! Ordered, transactional execution of a batch over one shared
//! connection.

use std::collections::BTreeMap;

use sqlgate_core::{Action, ApiError, ApiResult, Claims, Operation};
use sqlgate_db::{Connection, OperationExecutor};

use crate::plan::build_plan;
use crate::reference::resolve_params;
use crate::request::{BatchOutcome, BatchRequest, OperationRecord, MAX_BATCH_SIZE};

pub struct BatchOrchestrator<'a> {
    executor: &'a dyn OperationExecutor,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(executor: &'a dyn OperationExecutor) -> BatchOrchestrator<'a> {
        BatchOrchestrator { executor }
    }

    /// Execute a batch on the shared connection.
    ///
    /// Structural errors (size overflow, malformed ids, unknown
    /// references, cycles) abort before anything executes and surface as
    /// an `Err`. Per-operation failures are recorded and, depending on
    /// the options, stop the iteration and roll the transaction back.
    pub async fn execute(
        &self,
        conn: &mut dyn Connection,
        request: BatchRequest,
        default_claims: &Claims,
    ) -> ApiResult<BatchOutcome> {
        if request.operations.len() > MAX_BATCH_SIZE {
            return Err(ApiError::BadRequest(format!(
                "batch size {} exceeds the limit of {MAX_BATCH_SIZE}",
                request.operations.len()
            )));
        }

        let plan = build_plan(&request.operations)?;
        let options = request.options;

        conn.begin().await?;

        let mut records: BTreeMap<String, OperationRecord> = BTreeMap::new();
        for id in &plan.order {
            let planned = &plan.operations[id];

            // A dependency that did not complete poisons its dependents;
            // skip propagation makes the check transitive.
            let dependency_ok = planned
                .depends_on
                .iter()
                .all(|d| records.get(d).is_some_and(OperationRecord::is_completed));
            if !dependency_ok {
                records.insert(
                    id.clone(),
                    OperationRecord::Skipped {
                        reason: "dependency failed".into(),
                    },
                );
                continue;
            }

            match self.run_one(conn, planned, default_claims, &records).await {
                Ok(data) => {
                    records.insert(id.clone(), OperationRecord::Completed { data });
                }
                Err(err) => {
                    tracing::warn!(operation = %id, error = %err, "batch operation failed");
                    records.insert(
                        id.clone(),
                        OperationRecord::Failed {
                            error: err.public_message().to_string(),
                            status_code: err.status_code(),
                        },
                    );
                    if options.atomic && !options.continue_on_error {
                        break;
                    }
                }
            }
        }

        let any_failed = records.values().any(OperationRecord::is_failed);
        if options.atomic && any_failed {
            conn.rollback().await?;
        } else {
            conn.commit().await?;
        }

        let success = plan
            .order
            .iter()
            .all(|id| records.get(id).is_some_and(OperationRecord::is_completed));
        let failed_operations = plan
            .order
            .iter()
            .filter(|id| records.get(*id).is_some_and(OperationRecord::is_failed))
            .cloned()
            .collect();

        Ok(BatchOutcome {
            success,
            results: records,
            failed_operations,
        })
    }

    async fn run_one(
        &self,
        conn: &mut dyn Connection,
        planned: &crate::plan::PlannedOperation,
        default_claims: &Claims,
        records: &BTreeMap<String, OperationRecord>,
    ) -> ApiResult<serde_json::Value> {
        let spec = &planned.spec;
        let action: Action = spec.action.parse()?;
        if action == Action::Batch || spec.entity == "batch" {
            return Err(ApiError::BadRequest("batches do not nest".into()));
        }

        let query_params = resolve_params(&spec.query_params, records)?;
        let store_params = resolve_params(&spec.store_params, records)?;

        let claims = spec
            .claims
            .as_ref()
            .map(Claims::from_authorizer)
            .unwrap_or_else(|| default_claims.clone());

        let mut operation = Operation::new(&spec.entity, action)
            .with_claims(claims)
            .with_query_params(query_params)
            .with_store_params(store_params);
        operation.metadata_params = spec.metadata_params.clone();

        self.executor.execute(conn, &operation).await
    }
}
