//! End-to-end coverage of the write-permission policy (C7) as enforced
//! through `Handler::execute_write`, exercising spec.md §8 scenario 3
//! (write denied by policy) and P4 (a write never reaches the driver
//! without a prior successful permission check).

use db_broker::config::PoolOptions;
use db_broker::db::audit::{AuditLog, AuditStatus};
use db_broker::db::pool::ConnectionManager;
use db_broker::db::retry::{RetryConfig, RetryHandler};
use db_broker::db::session::BackendSession;
use db_broker::error::DbError;
use db_broker::handler::{Handler, CONFIRMATION_TOKEN};
use db_broker::models::{
    AllowedOp, ConnectionConfig, DatabaseType, DefaultPolicy, OperationKind, ResourceClass,
    ResourceRule, WritePermissions,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

async fn handler_with_permissions(write_permissions: Option<WritePermissions>) -> (Handler, NamedTempFile, tempfile::TempDir) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let mut configs = HashMap::new();
    configs.insert(
        "c2".to_string(),
        ConnectionConfig::new(
            "c2",
            DatabaseType::Sqlite,
            format!("sqlite:{db_path}?mode=rwc"),
            true,
            None,
            write_permissions,
            PoolOptions::default(),
        )
        .unwrap(),
    );
    let pool = Arc::new(ConnectionManager::new(configs, Duration::from_secs(5)));

    {
        let mut guard = pool.get("c2").await.unwrap();
        let BackendSession::Sql(session) = &mut *guard else {
            unreachable!("sqlite connection")
        };
        let db_broker::db::SqlPool::Sqlite(sqlite_pool) = session.pool().clone() else {
            unreachable!("sqlite connection")
        };
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT)")
            .execute(&sqlite_pool)
            .await
            .unwrap();
    }

    let audit_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::new(audit_dir.path().join("audit.log")));
    let retry = RetryHandler::new(RetryConfig::default());
    (Handler::new(pool, audit, retry, Duration::from_secs(5)), temp_file, audit_dir)
}

fn users_insert_update_only() -> WritePermissions {
    let mut ops = HashSet::new();
    ops.insert(AllowedOp::Insert);
    ops.insert(AllowedOp::Update);
    let mut rules = HashMap::new();
    rules.insert("users".to_string(), ResourceRule { allowed_ops: ops });
    let mut by_class = HashMap::new();
    by_class.insert(ResourceClass::Tables, rules);
    WritePermissions {
        default_policy: DefaultPolicy::ReadOnly,
        rules: by_class,
    }
}

#[tokio::test]
async fn delete_denied_when_policy_only_allows_insert_and_update() {
    let (handler, _temp, _audit) = handler_with_permissions(Some(users_insert_update_only())).await;
    let result = handler
        .execute_write("c2", "DELETE FROM users WHERE id = 1", CONFIRMATION_TOKEN)
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, DbError::Permission { .. }));
    let message = err.to_string();
    assert!(message.contains("users"));
    assert!(message.contains("DELETE"));

    // P5: the denied attempt is still audited, as a FAILED record.
    let logs = handler
        .get_audit_logs("c2", Some("users"), Some(OperationKind::Delete), Some(AuditStatus::Failed), 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn insert_allowed_and_recorded_when_policy_covers_it() {
    let (handler, _temp, _audit) = handler_with_permissions(Some(users_insert_update_only())).await;
    let result = handler
        .execute_write(
            "c2",
            "INSERT INTO users (name, email) VALUES ('Test', 't@x')",
            CONFIRMATION_TOKEN,
        )
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(1));

    let logs = handler
        .get_audit_logs("c2", Some("users"), Some(OperationKind::Insert), Some(AuditStatus::Success), 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].affected_rows, Some(1));
}

#[tokio::test]
async fn write_denied_on_a_non_writable_connection_regardless_of_policy() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    let mut configs = HashMap::new();
    configs.insert(
        "ro".to_string(),
        ConnectionConfig::new(
            "ro",
            DatabaseType::Sqlite,
            format!("sqlite:{db_path}?mode=rwc"),
            false,
            None,
            Some(WritePermissions {
                default_policy: DefaultPolicy::AllowAll,
                rules: HashMap::new(),
            }),
            PoolOptions::default(),
        )
        .unwrap(),
    );
    let pool = Arc::new(ConnectionManager::new(configs, Duration::from_secs(5)));
    {
        let mut guard = pool.get("ro").await.unwrap();
        let BackendSession::Sql(session) = &mut *guard else {
            unreachable!("sqlite connection")
        };
        let db_broker::db::SqlPool::Sqlite(sqlite_pool) = session.pool().clone() else {
            unreachable!("sqlite connection")
        };
        sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY)")
            .execute(&sqlite_pool)
            .await
            .unwrap();
    }
    let audit_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::new(audit_dir.path().join("audit.log")));
    let retry = RetryHandler::new(RetryConfig::default());
    let handler = Handler::new(pool, audit, retry, Duration::from_secs(5));

    let result = handler
        .execute_write("ro", "INSERT INTO notes (id) VALUES (1)", CONFIRMATION_TOKEN)
        .await;
    assert!(matches!(result.unwrap_err(), DbError::Permission { .. }));
}

#[tokio::test]
async fn allow_all_default_policy_permits_writes_without_an_explicit_rule() {
    let (handler, _temp, _audit) = handler_with_permissions(Some(WritePermissions {
        default_policy: DefaultPolicy::AllowAll,
        rules: HashMap::new(),
    }))
    .await;
    let result = handler
        .execute_write(
            "c2",
            "INSERT INTO users (name, email) VALUES ('Anyone', 'a@x')",
            CONFIRMATION_TOKEN,
        )
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(1));
}

#[tokio::test]
async fn missing_write_permissions_block_all_writes_by_default() {
    let (handler, _temp, _audit) = handler_with_permissions(None).await;
    let result = handler
        .execute_write("c2", "INSERT INTO users (name, email) VALUES ('Nope', 'n@x')", CONFIRMATION_TOKEN)
        .await;
    assert!(matches!(result.unwrap_err(), DbError::Permission { .. }));
}
