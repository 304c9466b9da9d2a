//! # sqlgate-batch — transactional multi-operation execution
//!
//! A batch is an ordered list of operation specs with optional ids,
//! explicit `depends_on` edges, and `$ref:op_id.path` placeholders that
//! splice results of earlier operations into the parameters of later
//! ones. The orchestrator:
//!
//! 1. normalizes ids and topologically orders the dependency graph,
//! 2. executes each operation on one shared connection through the
//!    [`OperationExecutor`] seam,
//! 3. records a `completed`/`failed`/`skipped` status per operation, and
//! 4. commits or rolls back the shared transaction according to the
//!    `atomic` option.
//!
//! [`OperationExecutor`]: sqlgate_db::OperationExecutor

pub mod orchestrator;
pub mod plan;
pub mod reference;
pub mod request;

pub use orchestrator::BatchOrchestrator;
pub use plan::{build_plan, ExecutionPlan, PlannedOperation};
pub use request::{BatchOptions, BatchOutcome, BatchRequest, OperationRecord, OperationSpec,
    MAX_BATCH_SIZE};
