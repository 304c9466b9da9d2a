//! Test support for the sqlgate workspace: a scripted [`Connection`] fake
//! that records every statement and transaction verb, plus small claim
//! and row helpers.
//!
//! The fake is a cloneable handle over shared state, so a test can keep
//! one handle for assertions while the service consumes another through
//! [`ConnectionProvider`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use sqlgate_core::{ApiError, ApiResult, Claims, SqlValue};
use sqlgate_db::{Connection, ConnectionProvider, QueryOutput};

/// One entry in the fake's transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Begin,
    Execute { sql: String, params: Vec<SqlValue> },
    Commit,
    Rollback,
    Close,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<ApiResult<QueryOutput>>,
    log: Vec<LogEntry>,
}

/// Scripted connection: `execute` pops the next scripted result (an empty
/// result set once the script runs dry) and every call lands in the
/// transcript.
#[derive(Clone, Default)]
pub struct ScriptedConnection {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedConnection {
    pub fn new() -> ScriptedConnection {
        ScriptedConnection::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Script a result set for the next statement.
    pub fn push_rows(&self, rows: Vec<Map<String, Value>>) {
        self.lock().script.push_back(Ok(QueryOutput {
            rows,
            rowcount: 0,
            last_insert_id: None,
        }));
    }

    /// Script an affected-row count for the next DML statement.
    pub fn push_rowcount(&self, rowcount: u64) {
        self.lock().script.push_back(Ok(QueryOutput {
            rows: Vec::new(),
            rowcount,
            last_insert_id: None,
        }));
    }

    pub fn push_output(&self, output: QueryOutput) {
        self.lock().script.push_back(Ok(output));
    }

    /// Script a driver failure for the next statement.
    pub fn push_error(&self, error: ApiError) {
        self.lock().script.push_back(Err(error));
    }

    /// The full transcript so far.
    pub fn log(&self) -> Vec<LogEntry> {
        self.lock().log.clone()
    }

    /// Only the executed statements, in order.
    pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.lock()
            .log
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Execute { sql, params } => Some((sql.clone(), params.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Connection for ScriptedConnection {
    async fn begin(&mut self) -> ApiResult<()> {
        self.lock().log.push(LogEntry::Begin);
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> ApiResult<QueryOutput> {
        let mut inner = self.lock();
        inner.log.push(LogEntry::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        inner.script.pop_front().unwrap_or_else(|| Ok(QueryOutput::default()))
    }

    async fn commit(&mut self) -> ApiResult<()> {
        self.lock().log.push(LogEntry::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> ApiResult<()> {
        self.lock().log.push(LogEntry::Rollback);
        Ok(())
    }

    async fn close(&mut self) -> ApiResult<()> {
        self.lock().log.push(LogEntry::Close);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for ScriptedConnection {
    async fn connect(&self) -> ApiResult<Box<dyn Connection>> {
        Ok(Box::new(self.clone()))
    }
}

/// Build a row map from property/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Claims with a subject and roles, the common test shape.
pub fn claims(sub: &str, roles: &[&str]) -> Claims {
    Claims::from_authorizer(&serde_json::json!({
        "sub": sub,
        "roles": roles,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_results_pop_in_order() {
        let conn = ScriptedConnection::new();
        conn.push_rows(vec![row(&[("a", json!(1))])]);
        conn.push_rowcount(2);

        let mut handle = conn.clone();
        let first = handle.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(first.rows.len(), 1);
        let second = handle.execute("UPDATE t", &[SqlValue::Int(1)]).await.unwrap();
        assert_eq!(second.rowcount, 2);
        // Past the script: empty output, not an error.
        let third = handle.execute("SELECT 2", &[]).await.unwrap();
        assert!(third.rows.is_empty());

        assert_eq!(conn.statements().len(), 3);
        assert_eq!(conn.statements()[1].1, vec![SqlValue::Int(1)]);
    }

    #[tokio::test]
    async fn transcript_records_transaction_verbs() {
        let conn = ScriptedConnection::new();
        let mut handle = conn.clone();
        handle.begin().await.unwrap();
        handle.rollback().await.unwrap();
        assert_eq!(conn.log(), vec![LogEntry::Begin, LogEntry::Rollback]);
    }
}
