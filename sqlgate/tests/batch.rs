//! Batch endpoint scenarios: atomic commit, atomic rollback, and the
//! structural boundary checks.

use std::sync::Arc;

use serde_json::{json, Value};
use sqlgate::{ApiError, ApiModel, DbEngine, GatewayConfig, GatewayEvent, GatewayService, SqlValue};
use sqlgate_test::{row, LogEntry, ScriptedConnection};

const SPEC: &str = r#"
schema_objects:
  invoice:
    database: chinook
    properties:
      invoice_id: { type: integer, primary-key: auto }
      total: { type: number }
    permissions:
      default:
        read: { manager: ".*" }
        write: { manager: ".*" }
  invoice_line:
    database: chinook
    properties:
      line_id: { type: integer, primary-key: auto }
      invoice_id: { type: integer }
      qty: { type: integer }
    permissions:
      default:
        read: { manager: ".*" }
        write: { manager: ".*" }
"#;

/// Route library logs to the test output, honoring `LOG_LEVEL`.
fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn service(conn: &ScriptedConnection) -> GatewayService<ScriptedConnection> {
    init_tracing();
    let model = Arc::new(ApiModel::from_yaml(SPEC).expect("fixture model"));
    let config = GatewayConfig::for_engine(DbEngine::Postgresql);
    GatewayService::new(model, config, conn.clone())
}

fn batch_event(body: Value) -> GatewayEvent {
    serde_json::from_value(json!({
        "httpMethod": "POST",
        "path": "/batch",
        "body": body.to_string(),
        "requestContext": {"authorizer": {"sub": "m-1", "roles": ["manager"]}},
    }))
    .expect("fixture event")
}

fn body_json(response: &sqlgate::GatewayResponse) -> Value {
    serde_json::from_str(&response.body).expect("json body")
}

fn invoice_and_lines(line_store: Value) -> Value {
    json!({
        "operations": [
            {"id": "a", "entity": "invoice", "action": "create",
             "store_params": {"total": 5.0}},
            {"id": "b", "entity": "invoice_line", "action": "create",
             "store_params": line_store},
            {"id": "c", "entity": "invoice", "action": "update",
             "query_params": {"invoice_id": "$ref:a.invoice_id"},
             "store_params": {"total": 7.5}},
        ]
    })
}

#[tokio::test]
async fn atomic_batch_commits_once_and_substitutes_references() {
    let conn = ScriptedConnection::new();
    // a: insert invoice (RETURNING row)
    conn.push_rows(vec![row(&[("invoice_id", json!(9)), ("total", json!(5.0))])]);
    // b: insert invoice_line (RETURNING row)
    conn.push_rows(vec![row(&[
        ("line_id", json!(1)),
        ("invoice_id", json!(9)),
        ("qty", json!(2)),
    ])]);
    // c: update invoice, then refetch
    conn.push_rowcount(1);
    conn.push_rows(vec![row(&[("invoice_id", json!(9)), ("total", json!(7.5))])]);

    let response = service(&conn)
        .handle(batch_event(invoice_and_lines(
            json!({"invoice_id": "$ref:a.invoice_id", "qty": 2}),
        )))
        .await;

    assert_eq!(response.status_code, 200);
    let outcome = body_json(&response);
    assert_eq!(outcome["success"], json!(true));
    assert_eq!(outcome["failed_operations"], json!([]));
    for id in ["a", "b", "c"] {
        assert_eq!(outcome["results"][id]["status"], json!("completed"));
    }

    let statements = conn.statements();
    // The reference resolved to the typed key from a's result.
    assert!(statements[1].0.starts_with("INSERT INTO invoice_line"));
    assert_eq!(statements[1].1, vec![SqlValue::Int(9), SqlValue::Int(2)]);
    assert!(statements[2].0.starts_with("UPDATE invoice"));
    assert_eq!(statements[2].1, vec![SqlValue::Float(7.5), SqlValue::Int(9)]);

    let verbs: Vec<LogEntry> = conn
        .log()
        .into_iter()
        .filter(|e| !matches!(e, LogEntry::Execute { .. }))
        .collect();
    assert_eq!(verbs, vec![LogEntry::Begin, LogEntry::Commit, LogEntry::Close]);
}

#[tokio::test]
async fn atomic_batch_rolls_back_on_failure() {
    let conn = ScriptedConnection::new();
    // a succeeds, b violates a constraint.
    conn.push_rows(vec![row(&[("invoice_id", json!(9)), ("total", json!(5.0))])]);
    conn.push_error(ApiError::BadRequest("violates foreign key".into()));

    let response = service(&conn)
        .handle(batch_event(invoice_and_lines(
            json!({"invoice_id": "$ref:a.invoice_id", "qty": 2}),
        )))
        .await;

    assert_eq!(response.status_code, 200);
    let outcome = body_json(&response);
    assert_eq!(outcome["success"], json!(false));
    assert_eq!(outcome["failed_operations"], json!(["b"]));
    // a keeps its completed status for traceability.
    assert_eq!(outcome["results"]["a"]["status"], json!("completed"));
    assert_eq!(outcome["results"]["b"]["status"], json!("failed"));
    assert_eq!(outcome["results"]["b"]["status_code"], json!(400));
    // c was never executed: absent, not skipped.
    assert!(outcome["results"].get("c").is_none());

    assert!(conn.log().contains(&LogEntry::Rollback));
    assert!(!conn.log().contains(&LogEntry::Commit));
    // Only a and b ever reached the database.
    assert_eq!(conn.statements().len(), 2);
}

#[tokio::test]
async fn batch_over_the_size_limit_is_rejected() {
    let conn = ScriptedConnection::new();
    let operations: Vec<Value> = (0..101)
        .map(|_| json!({"entity": "invoice", "action": "create", "store_params": {"total": 1.0}}))
        .collect();

    let response = service(&conn)
        .handle(batch_event(json!({"operations": operations})))
        .await;

    assert_eq!(response.status_code, 400);
    let body = body_json(&response);
    assert!(body["error"].as_str().is_some_and(|m| m.contains("101")));
    // Rejected at plan time: no transaction was ever opened.
    assert!(!conn.log().contains(&LogEntry::Begin));
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let conn = ScriptedConnection::new();
    let response = service(&conn)
        .handle(batch_event(json!({
            "operations": [
                {"id": "a", "entity": "invoice", "action": "create", "store_params": {"total": 1.0}},
                {"id": "a", "entity": "invoice", "action": "create", "store_params": {"total": 2.0}},
            ]
        })))
        .await;
    assert_eq!(response.status_code, 400);
    assert!(body_json(&response)["error"]
        .as_str()
        .is_some_and(|m| m.contains("duplicate")));
}

#[tokio::test]
async fn circular_dependency_names_both_nodes() {
    let conn = ScriptedConnection::new();
    let response = service(&conn)
        .handle(batch_event(json!({
            "operations": [
                {"id": "a", "entity": "invoice", "action": "create",
                 "store_params": {"total": 1.0}, "depends_on": ["b"]},
                {"id": "b", "entity": "invoice", "action": "create",
                 "store_params": {"total": 2.0}, "depends_on": ["a"]},
            ]
        })))
        .await;
    assert_eq!(response.status_code, 400);
    let error = body_json(&response)["error"].as_str().map(String::from).unwrap_or_default();
    assert!(error.contains("circular"));
    assert!(error.contains("a -> b") || error.contains("b -> a"), "{error}");
}

#[tokio::test]
async fn missing_reference_target_names_the_id() {
    let conn = ScriptedConnection::new();
    let response = service(&conn)
        .handle(batch_event(json!({
            "operations": [
                {"entity": "invoice_line", "action": "create",
                 "store_params": {"invoice_id": "$ref:ghost.invoice_id"}},
            ]
        })))
        .await;
    assert_eq!(response.status_code, 400);
    assert!(body_json(&response)["error"]
        .as_str()
        .is_some_and(|m| m.contains("ghost")));
}

#[tokio::test]
async fn operations_without_ids_are_numbered_by_position() {
    let conn = ScriptedConnection::new();
    conn.push_rows(vec![row(&[("invoice_id", json!(1)), ("total", json!(1.0))])]);
    conn.push_rows(vec![row(&[("invoice_id", json!(2)), ("total", json!(2.0))])]);

    let response = service(&conn)
        .handle(batch_event(json!({
            "operations": [
                {"entity": "invoice", "action": "create", "store_params": {"total": 1.0}},
                {"entity": "invoice", "action": "create", "store_params": {"total": 2.0}},
            ]
        })))
        .await;

    let outcome = body_json(&response);
    assert_eq!(outcome["results"]["op_0"]["status"], json!("completed"));
    assert_eq!(outcome["results"]["op_1"]["status"], json!("completed"));
}
