use serde_json::{Map, Value};
use sqlgate_core::{ApiResult, SqlValue};

/// Result of one statement execution.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Fetched rows, keyed by column alias.
    pub rows: Vec<Map<String, Value>>,
    /// Affected-row count for DML statements.
    pub rowcount: u64,
    /// Driver-reported generated key, where the engine exposes one.
    pub last_insert_id: Option<i64>,
}

/// Opaque connection capability the core requires from a backend.
///
/// One connection is owned exclusively by one request for its lifetime;
/// the cursor lifecycle for a statement is managed inside `execute`.
/// Timeouts are the driver's concern.
#[async_trait::async_trait]
pub trait Connection: Send {
    async fn begin(&mut self) -> ApiResult<()>;

    /// Execute one parameterized statement and fetch its result set.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> ApiResult<QueryOutput>;

    async fn commit(&mut self) -> ApiResult<()>;

    async fn rollback(&mut self) -> ApiResult<()>;

    async fn close(&mut self) -> ApiResult<()>;
}

/// Hands out connections, one per request.
#[async_trait::async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self) -> ApiResult<Box<dyn Connection>>;
}
