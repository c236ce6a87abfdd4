//! End-to-end coverage of the `Handler` (C11) tool surface against a
//! real SQLite database, exercising spec.md §8's scenarios 1/2/4: a
//! plain SELECT, a write rejected for missing confirmation, and a write
//! that succeeds and is audited.

use db_broker::config::PoolOptions;
use db_broker::db::audit::{AuditLog, AuditStatus};
use db_broker::db::pool::ConnectionManager;
use db_broker::db::retry::{RetryConfig, RetryHandler};
use db_broker::db::session::BackendSession;
use db_broker::handler::{Handler, CONFIRMATION_TOKEN};
use db_broker::models::{ConnectionConfig, DatabaseType, OperationKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

async fn seeded_handler() -> (Handler, NamedTempFile, TempDir) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let mut configs = HashMap::new();
    configs.insert(
        "c1".to_string(),
        ConnectionConfig::new(
            "c1",
            DatabaseType::Sqlite,
            format!("sqlite:{db_path}?mode=rwc"),
            true,
            None,
            None,
            PoolOptions::default(),
        )
        .unwrap(),
    );
    let pool = Arc::new(ConnectionManager::new(configs, Duration::from_secs(5)));

    // `execute_write`/`run_query` only recognize SELECT/INSERT/UPDATE/DELETE
    // (spec.md §4.8's classifier has no DDL case), so schema setup goes
    // straight through the pooled connection like the teacher's own test
    // setup does before exercising the tool surface.
    {
        let mut guard = pool.get("c1").await.unwrap();
        let BackendSession::Sql(session) = &mut *guard else {
            unreachable!("sqlite connection")
        };
        let db_broker::db::SqlPool::Sqlite(sqlite_pool) = session.pool().clone() else {
            unreachable!("sqlite connection")
        };
        sqlx::query("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL)")
            .execute(&sqlite_pool)
            .await
            .unwrap();
    }

    let audit_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::new(audit_dir.path().join("audit.log")));
    let retry = RetryHandler::new(RetryConfig::default());
    let handler = Handler::new(pool, audit, retry, Duration::from_secs(5));

    handler
        .execute_write(
            "c1",
            "INSERT INTO products (id, name, price) VALUES (1, 'Widget', 9.99), (2, 'Gadget', 19.99)",
            CONFIRMATION_TOKEN,
        )
        .await
        .expect("seed insert should succeed");

    (handler, temp_file, audit_dir)
}

#[tokio::test]
async fn select_on_sqlite_returns_ordered_rows() {
    let (handler, _temp, _audit_dir) = seeded_handler().await;
    let result = handler
        .run_query("c1", "SELECT name FROM products ORDER BY price")
        .await
        .unwrap();
    let names: Vec<&str> = result
        .rows
        .iter()
        .map(|row| row.get("name").unwrap().as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Widget", "Gadget"]);
}

#[tokio::test]
async fn run_query_rejects_non_select_statements() {
    let (handler, _temp, _audit_dir) = seeded_handler().await;
    let result = handler.run_query("c1", "DELETE FROM products").await;
    assert!(matches!(result, Err(db_broker::error::DbError::Configuration { .. })));
}

#[tokio::test]
async fn write_without_confirmation_is_rejected_before_any_driver_io() {
    let (handler, _temp, _audit_dir) = seeded_handler().await;
    let result = handler
        .execute_write("c1", "DELETE FROM products WHERE id = 1", "")
        .await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("confirmation required"));

    // The row is still there: nothing reached the driver.
    let rows = handler.run_query("c1", "SELECT id FROM products").await.unwrap();
    assert_eq!(rows.rows.len(), 2);
}

#[tokio::test]
async fn write_allowed_and_audited_reports_affected_rows() {
    let (handler, _temp, _audit_dir) = seeded_handler().await;
    let result = handler
        .execute_write(
            "c1",
            "INSERT INTO products (id, name, price) VALUES (3, 'Gizmo', 4.5)",
            CONFIRMATION_TOKEN,
        )
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(1));

    let logs = handler
        .get_audit_logs("c1", Some("products"), Some(OperationKind::Insert), Some(AuditStatus::Success), 10)
        .await
        .unwrap();
    assert!(logs.iter().any(|r| r.affected_rows == Some(1)));
}

#[tokio::test]
async fn list_tables_and_describe_table_reflect_the_schema() {
    let (handler, _temp, _audit_dir) = seeded_handler().await;
    let tables = handler.list_tables("c1").await.unwrap();
    assert!(tables.iter().any(|t| t.name == "products"));

    let description = handler.describe_table("c1", "products").await.unwrap();
    let field_names: Vec<&str> = description.fields.iter().map(|f| f.name.as_str()).collect();
    assert!(field_names.contains(&"id"));
    assert!(field_names.contains(&"name"));
    assert!(field_names.contains(&"price"));
}
