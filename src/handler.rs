//! Handler (C11): the orchestrator binding the connection pool (C4), the
//! permission checker (C7), the operation validator (C8), the audit log
//! (C9), the retry handler (C10), and the per-backend adapters (C5) into
//! exactly the ten `dbutils-*` operations spec.md §6 exposes as MCP
//! tools.
//!
//! Every public method here runs one call through `Created →
//! ConnectionAcquired → Validated → Authorised → Executing →
//! (Success|Failed) → AuditEmitted → StatsEmitted → Released` (spec.md
//! §4.11): config lookup, permission check, AST validation, a pooled
//! connection, the adapter call, an audit record for writes, and a
//! single `tracing` emission with the call's outcome and duration —
//! grounded in the teacher's `mcp/service.rs` request span pattern,
//! generalized from one HTTP request to one MCP tool call.
//!
//! `dbutils-run-query`/`dbutils-explain-query`/`dbutils-execute-write`
//! take a single `sql` string per spec.md §6's tool table, written from
//! the SQL-family vantage point. For Mongo/Redis connections that field
//! carries a JSON-encoded `DocumentQuery`/`KvCommand` payload instead of
//! SQL text — the same wire parameter, interpreted per the connection's
//! backend, rather than three backend-specific tools.

use crate::db::adapter::mongo::MongoAdapter;
use crate::db::adapter::redis::RedisAdapter;
use crate::db::adapter::sql::SqlAdapter;
use crate::db::adapter::{Adapter, ConstraintDescription, IndexDescription, ResourceDescription, ResourceStats, ResourceSummary};
use crate::db::audit::{AuditFilter, AuditLog, AuditRecord, AuditStatus};
use crate::db::permission;
use crate::db::pool::ConnectionManager;
use crate::db::retry::RetryHandler;
use crate::db::validator;
use crate::error::{DbError, DbResult};
use crate::models::{AbstractQuery, ConnectionConfig, DatabaseType, DocumentQuery, KvCommand, MAX_ROW_LIMIT, OperationKind, QueryResult, SqlQuery};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Literal confirmation token `dbutils-execute-write` requires (spec.md
/// §6).
pub const CONFIRMATION_TOKEN: &str = "CONFIRM_WRITE";

fn adapter_for(db_type: DatabaseType) -> Box<dyn Adapter> {
    match db_type {
        DatabaseType::Sqlite | DatabaseType::Postgres | DatabaseType::Mysql => Box::new(SqlAdapter),
        DatabaseType::MongoDb => Box::new(MongoAdapter),
        DatabaseType::Redis => Box::new(RedisAdapter),
    }
}

pub struct Handler {
    pool: Arc<ConnectionManager>,
    audit: Arc<AuditLog>,
    retry: RetryHandler,
    query_timeout: Duration,
    query_counter: AtomicU64,
    error_histogram: Mutex<HashMap<String, u64>>,
}

impl Handler {
    pub fn new(pool: Arc<ConnectionManager>, audit: Arc<AuditLog>, retry: RetryHandler, query_timeout: Duration) -> Self {
        Self {
            pool,
            audit,
            retry,
            query_timeout,
            query_counter: AtomicU64::new(0),
            error_histogram: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.pool.connection_names()
    }

    /// Closes every pooled connection (spec.md §4.4: shutdown path).
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
    }

    /// Total calls handled since startup (spec.md §4.11's "query
    /// counter").
    pub fn total_calls(&self) -> u64 {
        self.query_counter.load(Ordering::Relaxed)
    }

    /// Snapshot of the per-`DbError`-variant failure counts accumulated
    /// since startup (spec.md §4.11's "error histogram").
    pub async fn error_histogram(&self) -> HashMap<String, u64> {
        self.error_histogram.lock().await.clone()
    }

    /// The backend kind registered for `connection`, used by the tool
    /// layer for the `[<backend>]` labelling spec.md §6 requires on
    /// successful reads.
    pub fn backend_of(&self, connection: &str) -> DbResult<DatabaseType> {
        Ok(self.config_for(connection)?.db_type)
    }

    fn config_for(&self, connection: &str) -> DbResult<ConnectionConfig> {
        self.pool
            .config(connection)
            .cloned()
            .ok_or_else(|| DbError::configuration(format!("no connection configured named '{connection}'")))
    }

    /// Runs one call, timing it and folding its outcome into the shared
    /// counters before the result reaches the tool layer (spec.md §4.11
    /// steps "Executing" through "StatsEmitted").
    async fn call<T, Fut>(&self, tool: &'static str, connection: &str, fut: Fut) -> DbResult<T>
    where
        Fut: std::future::Future<Output = DbResult<T>>,
    {
        let start = Instant::now();
        self.query_counter.fetch_add(1, Ordering::Relaxed);
        let result = fut.await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                tracing::info!(tool, connection, elapsed_ms, "dbutils call succeeded");
            }
            Err(err) => {
                let variant = err.variant_name();
                let mut histogram = self.error_histogram.lock().await;
                *histogram.entry(variant.to_string()).or_insert(0) += 1;
                drop(histogram);
                tracing::warn!(tool, connection, elapsed_ms, error = %err, variant, "dbutils call failed");
            }
        }
        result
    }

    /// `dbutils-run-query`: SELECT-only read, rejecting any other
    /// statement shape with `Configuration` (spec.md §6).
    pub async fn run_query(&self, connection: &str, sql: &str) -> DbResult<QueryResult> {
        self.call("dbutils-run-query", connection, self.run_query_inner(connection, sql)).await
    }

    async fn run_query_inner(&self, connection: &str, sql: &str) -> DbResult<QueryResult> {
        let config = self.config_for(connection)?;
        let db_type = config.db_type;
        let query = parse_read_payload(db_type, sql, "dbutils-run-query")?;

        let mut adapter = adapter_for(db_type);
        let resource = adapter.extract_resource_name(&query);
        permission::check(&config, &resource, OperationKind::Read)?;
        validator::validate(OperationKind::Read, &resource, &query, db_type)?;

        let mut guard = self.retry.run(|| self.pool.get(connection)).await?;
        adapter.execute_query(&mut guard, &query, crate::models::DEFAULT_ROW_LIMIT, self.query_timeout).await
    }

    /// `dbutils-list-tables`.
    pub async fn list_tables(&self, connection: &str) -> DbResult<Vec<ResourceSummary>> {
        self.call("dbutils-list-tables", connection, async {
            let config = self.config_for(connection)?;
            let mut guard = self.retry.run(|| self.pool.get(connection)).await?;
            adapter_for(config.db_type).list_resources(&mut guard).await
        })
        .await
    }

    async fn describe_inner(&self, connection: &str, table: &str) -> DbResult<ResourceDescription> {
        let config = self.config_for(connection)?;
        let mut guard = self.retry.run(|| self.pool.get(connection)).await?;
        adapter_for(config.db_type).describe_resource(&mut guard, table).await
    }

    /// `dbutils-describe-table`.
    pub async fn describe_table(&self, connection: &str, table: &str) -> DbResult<ResourceDescription> {
        self.call("dbutils-describe-table", connection, self.describe_inner(connection, table)).await
    }

    /// `dbutils-get-ddl`.
    pub async fn get_ddl(&self, connection: &str, table: &str) -> DbResult<Option<String>> {
        self.call("dbutils-get-ddl", connection, async {
            Ok(self.describe_inner(connection, table).await?.native_ddl)
        })
        .await
    }

    /// `dbutils-list-indexes`.
    pub async fn list_indexes(&self, connection: &str, table: &str) -> DbResult<Vec<IndexDescription>> {
        self.call("dbutils-list-indexes", connection, async {
            Ok(self.describe_inner(connection, table).await?.indexes)
        })
        .await
    }

    /// `dbutils-list-constraints`.
    pub async fn list_constraints(&self, connection: &str, table: &str) -> DbResult<Vec<ConstraintDescription>> {
        self.call("dbutils-list-constraints", connection, async {
            Ok(self.describe_inner(connection, table).await?.constraints)
        })
        .await
    }

    /// `dbutils-get-stats`.
    pub async fn get_stats(&self, connection: &str, table: &str) -> DbResult<ResourceStats> {
        self.call("dbutils-get-stats", connection, async {
            let config = self.config_for(connection)?;
            let mut guard = self.retry.run(|| self.pool.get(connection)).await?;
            adapter_for(config.db_type).get_resource_stats(&mut guard, table).await
        })
        .await
    }

    /// `dbutils-explain-query`: SQL-family only. Produces the backend's
    /// estimated plan; never runs `ANALYZE`, since that would execute the
    /// statement (spec.md §6: "actual plans where ANALYZE is safe" — for
    /// a read-only introspection tool that is never, so only the
    /// estimated plan is returned).
    pub async fn explain_query(&self, connection: &str, sql: &str) -> DbResult<QueryResult> {
        self.call("dbutils-explain-query", connection, self.explain_query_inner(connection, sql)).await
    }

    async fn explain_query_inner(&self, connection: &str, sql: &str) -> DbResult<QueryResult> {
        let config = self.config_for(connection)?;
        let db_type = config.db_type;
        if !db_type.is_sql() {
            return Err(DbError::not_implemented(format!(
                "dbutils-explain-query is only supported for SQL backends; '{connection}' is {db_type}"
            )));
        }
        let kind = validator::classify_sql(sql, db_type)?;
        if kind != OperationKind::Read {
            return Err(DbError::configuration(
                "dbutils-explain-query only accepts SELECT statements",
            ));
        }
        let explain_sql = match db_type {
            DatabaseType::Sqlite => format!("EXPLAIN QUERY PLAN {sql}"),
            DatabaseType::Mysql => format!("EXPLAIN {sql}"),
            DatabaseType::Postgres => format!("EXPLAIN (FORMAT TEXT) {sql}"),
            DatabaseType::MongoDb | DatabaseType::Redis => unreachable!("filtered to SQL backends above"),
        };
        let query = AbstractQuery::Sql(
            SqlQuery {
                sql: explain_sql,
                params: HashMap::new(),
            },
            OperationKind::Read,
        );
        let mut guard = self.retry.run(|| self.pool.get(connection)).await?;
        adapter_for(db_type).execute_query(&mut guard, &query, MAX_ROW_LIMIT, self.query_timeout).await
    }

    /// `dbutils-execute-write`: requires the literal `confirmation`
    /// token, opens and closes its own transaction for SQL backends
    /// (spec.md §4.3, §6), and audits the outcome either way.
    pub async fn execute_write(&self, connection: &str, sql: &str, confirmation: &str) -> DbResult<QueryResult> {
        self.call(
            "dbutils-execute-write",
            connection,
            self.execute_write_inner(connection, sql, confirmation),
        )
        .await
    }

    async fn execute_write_inner(&self, connection: &str, sql: &str, confirmation: &str) -> DbResult<QueryResult> {
        if confirmation != CONFIRMATION_TOKEN {
            return Err(DbError::configuration(format!(
                "confirmation required: call dbutils-execute-write again with confirmation=\"{CONFIRMATION_TOKEN}\""
            )));
        }

        let config = self.config_for(connection)?;
        let db_type = config.db_type;
        let query = parse_write_payload(db_type, sql)?;
        let op = query.operation_kind();

        let mut adapter = adapter_for(db_type);
        let resource = adapter.extract_resource_name(&query);

        if let Err(err) = permission::check(&config, &resource, op) {
            let _ = self.audit.log_failed_operation(connection, &resource, op, None, &err).await;
            return Err(err);
        }
        if let Err(err) = validator::validate(op, &resource, &query, db_type) {
            let _ = self.audit.log_failed_operation(connection, &resource, op, None, &err).await;
            return Err(err);
        }

        let mut guard = self.retry.run(|| self.pool.get(connection)).await?;

        let in_own_transaction = db_type.is_sql();
        if in_own_transaction {
            if let Err(err) = guard.begin_transaction().await {
                let _ = self.audit.log_failed_operation(connection, &resource, op, None, &err).await;
                return Err(err);
            }
        }

        let result = adapter.execute_write(&mut guard, &query, self.query_timeout).await;
        match &result {
            Ok(write_result) => {
                if in_own_transaction {
                    guard.commit().await?;
                }
                let _ = self
                    .audit
                    .log_operation(connection, &resource, op, None, write_result.rows_affected, write_result.last_insert_id)
                    .await;
            }
            Err(err) => {
                if in_own_transaction {
                    let _ = guard.rollback(None).await;
                }
                let _ = self.audit.log_failed_operation(connection, &resource, op, None, err).await;
            }
        }
        result
    }

    /// `dbutils-get-audit-logs`.
    pub async fn get_audit_logs(
        &self,
        connection: &str,
        table: Option<&str>,
        operation_type: Option<OperationKind>,
        status: Option<AuditStatus>,
        limit: usize,
    ) -> DbResult<Vec<AuditRecord>> {
        self.call("dbutils-get-audit-logs", connection, async {
            // Confirms the connection is known even though audit records
            // are read from a store independent of any backend session.
            self.config_for(connection)?;
            let filter = AuditFilter {
                connection: Some(connection.to_string()),
                resource: table.map(str::to_string),
                operation: operation_type,
                status,
            };
            self.audit.get_logs(&filter, limit).await
        })
        .await
    }
}

/// Interpret the `sql` wire parameter as a read query for `db_type`:
/// literal SQL for the SQL family (rejecting non-SELECT with
/// `Configuration`), or a JSON-encoded `DocumentQuery`/`KvCommand` for
/// Mongo/Redis (rejecting a non-read operation tag the same way).
fn parse_read_payload(db_type: DatabaseType, sql: &str, tool: &str) -> DbResult<AbstractQuery> {
    match db_type {
        DatabaseType::Sqlite | DatabaseType::Postgres | DatabaseType::Mysql => {
            let kind = validator::classify_sql(sql, db_type)?;
            if kind != OperationKind::Read {
                return Err(DbError::configuration(format!(
                    "{tool} only accepts SELECT statements; got a {kind} statement"
                )));
            }
            Ok(AbstractQuery::Sql(
                SqlQuery {
                    sql: sql.to_string(),
                    params: HashMap::new(),
                },
                OperationKind::Read,
            ))
        }
        DatabaseType::MongoDb => {
            let doc: DocumentQuery = serde_json::from_str(sql)
                .map_err(|e| DbError::configuration(format!("invalid document query payload: {e}")))?;
            if doc.operation.operation_kind() != OperationKind::Read {
                return Err(DbError::configuration(format!(
                    "{tool} only accepts read operations; got {:?}",
                    doc.operation
                )));
            }
            Ok(AbstractQuery::Document(doc))
        }
        DatabaseType::Redis => {
            let cmd: KvCommand = serde_json::from_str(sql)
                .map_err(|e| DbError::configuration(format!("invalid key-value command payload: {e}")))?;
            if cmd.command.operation_kind() != OperationKind::Read {
                return Err(DbError::configuration(format!(
                    "{tool} only accepts read commands; got {:?}",
                    cmd.command
                )));
            }
            Ok(AbstractQuery::Kv(cmd))
        }
    }
}

/// Symmetric counterpart for `dbutils-execute-write`: rejects a read-kind
/// payload since that belongs in `dbutils-run-query`.
fn parse_write_payload(db_type: DatabaseType, sql: &str) -> DbResult<AbstractQuery> {
    match db_type {
        DatabaseType::Sqlite | DatabaseType::Postgres | DatabaseType::Mysql => {
            let kind = validator::classify_sql(sql, db_type)?;
            if kind == OperationKind::Read {
                return Err(DbError::configuration(
                    "dbutils-execute-write does not accept read statements; use dbutils-run-query instead",
                ));
            }
            Ok(AbstractQuery::Sql(
                SqlQuery {
                    sql: sql.to_string(),
                    params: HashMap::new(),
                },
                kind,
            ))
        }
        DatabaseType::MongoDb => {
            let doc: DocumentQuery = serde_json::from_str(sql)
                .map_err(|e| DbError::configuration(format!("invalid document query payload: {e}")))?;
            if doc.operation.operation_kind() == OperationKind::Read {
                return Err(DbError::configuration(
                    "dbutils-execute-write does not accept read operations; use dbutils-run-query instead",
                ));
            }
            Ok(AbstractQuery::Document(doc))
        }
        DatabaseType::Redis => {
            let cmd: KvCommand = serde_json::from_str(sql)
                .map_err(|e| DbError::configuration(format!("invalid key-value command payload: {e}")))?;
            if cmd.command.operation_kind() == OperationKind::Read {
                return Err(DbError::configuration(
                    "dbutils-execute-write does not accept read commands; use dbutils-run-query instead",
                ));
            }
            Ok(AbstractQuery::Kv(cmd))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::retry::RetryConfig;
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    fn sqlite_handler(dir: &tempfile::TempDir, writable: bool) -> Handler {
        let mut configs = StdHashMap::new();
        configs.insert(
            "c1".to_string(),
            ConnectionConfig::new(
                "c1",
                DatabaseType::Sqlite,
                "sqlite::memory:",
                writable,
                None,
                None,
                PoolOptions::default(),
            )
            .unwrap(),
        );
        let pool = Arc::new(ConnectionManager::new(configs, Duration::from_secs(5)));
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")));
        let retry = RetryHandler::new(RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 1.0,
        });
        Handler::new(pool, audit, retry, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn run_query_rejects_unknown_connection() {
        // spec.md §8: unknown connection name is a Configuration error,
        // not ResourceNotFound (that variant is reserved for a missing
        // table/collection/key once a connection is resolved).
        let dir = tempdir().unwrap();
        let handler = sqlite_handler(&dir, false);
        let result = handler.run_query("missing", "SELECT 1").await;
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[tokio::test]
    async fn run_query_rejects_non_select_with_configuration_error() {
        let dir = tempdir().unwrap();
        let handler = sqlite_handler(&dir, true);
        let result = handler.run_query("c1", "DELETE FROM widgets").await;
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[tokio::test]
    async fn execute_write_requires_confirmation_token() {
        let dir = tempdir().unwrap();
        let handler = sqlite_handler(&dir, true);
        let result = handler
            .execute_write("c1", "INSERT INTO widgets (id) VALUES (1)", "nope")
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("confirmation required"));
    }

    #[tokio::test]
    async fn execute_write_denied_by_policy_names_resource_and_operation() {
        let dir = tempdir().unwrap();
        let handler = sqlite_handler(&dir, true);
        let result = handler
            .execute_write("c1", "DELETE FROM users WHERE id = 1", CONFIRMATION_TOKEN)
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, DbError::Permission { .. }));
        let message = err.to_string();
        assert!(message.contains("users"));
        assert!(message.contains("DELETE"));
    }

    #[tokio::test]
    async fn total_calls_and_error_histogram_track_failures() {
        let dir = tempdir().unwrap();
        let handler = sqlite_handler(&dir, false);
        let _ = handler.run_query("missing", "SELECT 1").await;
        assert_eq!(handler.total_calls(), 1);
        let histogram = handler.error_histogram().await;
        assert_eq!(histogram.get("Configuration"), Some(&1));
    }
}
