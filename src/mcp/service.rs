//! MCP service implementation using rmcp.
//!
//! Exposes the ten `dbutils-*` tools (spec.md §6) over the `Handler`
//! (C11) orchestrator. One `#[tool]` method per row of the tool table;
//! each method validates its input, calls the matching `Handler`
//! method, and maps `DbError` onto `McpError` via the `rmcp::ErrorData`
//! conversion already implemented on `DbError`.

use crate::error::DbError;
use crate::handler::Handler;
use crate::tools::dbutils::{
    affected_rows_message, format_description, format_resource_list, DescribeTableInput,
    DescribeTableOutput, ExecuteWriteInput, ExecuteWriteOutput, ExplainQueryInput, ExplainQueryOutput,
    GetAuditLogsInput, GetAuditLogsOutput, GetDdlInput, GetDdlOutput, GetStatsInput, GetStatsOutput,
    ListConstraintsInput, ListConstraintsOutput, ListIndexesInput, ListIndexesOutput, ListTablesInput,
    ListTablesOutput, RunQueryInput, RunQueryOutput,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

fn map_err(e: DbError) -> McpError {
    e.into()
}

#[derive(Clone)]
pub struct DbService {
    handler: Arc<Handler>,
    tool_router: ToolRouter<Self>,
}

impl DbService {
    pub fn new(handler: Arc<Handler>) -> Self {
        Self {
            handler,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl DbService {
    #[tool(
        name = "dbutils-run-query",
        description = "Run a SELECT-only read query against a configured connection.\nFor SQL-family connections `sql` is literal SQL text; for MongoDB/Redis connections it is a JSON-encoded document-query/key-value-command payload. Rejects anything but a read with a configuration error."
    )]
    async fn dbutils_run_query(
        &self,
        Parameters(input): Parameters<RunQueryInput>,
    ) -> Result<Json<RunQueryOutput>, McpError> {
        let result = self
            .handler
            .run_query(&input.connection, &input.sql)
            .await
            .map_err(map_err)?;
        let backend = self.backend_label(&input.connection).await?;
        Ok(Json(RunQueryOutput {
            backend,
            columns: result.columns,
            row_count: result.row_count(),
            rows: result.rows,
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
        }))
    }

    #[tool(
        name = "dbutils-list-tables",
        description = "List the tables/collections/keys visible on a connection, with row counts where cheaply known."
    )]
    async fn dbutils_list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<Json<ListTablesOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let resources = self.handler.list_tables(&input.connection).await.map_err(map_err)?;
        let formatted = format_resource_list(&backend, &resources);
        let count = resources.len();
        Ok(Json(ListTablesOutput {
            backend,
            resources,
            count,
            formatted,
        }))
    }

    #[tool(
        name = "dbutils-describe-table",
        description = "Describe one table/collection's fields, indexes, and constraints."
    )]
    async fn dbutils_describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<Json<DescribeTableOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let description = self
            .handler
            .describe_table(&input.connection, &input.table)
            .await
            .map_err(map_err)?;
        let formatted = format_description(&backend, &description);
        Ok(Json(DescribeTableOutput {
            backend,
            description,
            formatted,
        }))
    }

    #[tool(
        name = "dbutils-get-ddl",
        description = "Return the backend-native CREATE statement for a table (reconstructed for postgres, native for mysql/sqlite)."
    )]
    async fn dbutils_get_ddl(
        &self,
        Parameters(input): Parameters<GetDdlInput>,
    ) -> Result<Json<GetDdlOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let ddl = self.handler.get_ddl(&input.connection, &input.table).await.map_err(map_err)?;
        Ok(Json(GetDdlOutput {
            backend,
            table: input.table,
            ddl,
        }))
    }

    #[tool(
        name = "dbutils-list-indexes",
        description = "List a table's indexes with their columns, uniqueness, and method."
    )]
    async fn dbutils_list_indexes(
        &self,
        Parameters(input): Parameters<ListIndexesInput>,
    ) -> Result<Json<ListIndexesOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let indexes = self
            .handler
            .list_indexes(&input.connection, &input.table)
            .await
            .map_err(map_err)?;
        Ok(Json(ListIndexesOutput {
            backend,
            table: input.table,
            indexes,
        }))
    }

    #[tool(
        name = "dbutils-get-stats",
        description = "Return row-count / size / page statistics for a table."
    )]
    async fn dbutils_get_stats(
        &self,
        Parameters(input): Parameters<GetStatsInput>,
    ) -> Result<Json<GetStatsOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let stats = self.handler.get_stats(&input.connection, &input.table).await.map_err(map_err)?;
        Ok(Json(GetStatsOutput { backend, stats }))
    }

    #[tool(
        name = "dbutils-list-constraints",
        description = "List a table's primary key, foreign key, unique, and check constraints."
    )]
    async fn dbutils_list_constraints(
        &self,
        Parameters(input): Parameters<ListConstraintsInput>,
    ) -> Result<Json<ListConstraintsOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let constraints = self
            .handler
            .list_constraints(&input.connection, &input.table)
            .await
            .map_err(map_err)?;
        Ok(Json(ListConstraintsOutput {
            backend,
            table: input.table,
            constraints,
        }))
    }

    #[tool(
        name = "dbutils-explain-query",
        description = "Show a SELECT statement's estimated query plan. SQL-family connections only; MongoDB/Redis return a not-implemented error."
    )]
    async fn dbutils_explain_query(
        &self,
        Parameters(input): Parameters<ExplainQueryInput>,
    ) -> Result<Json<ExplainQueryOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let result = self
            .handler
            .explain_query(&input.connection, &input.sql)
            .await
            .map_err(map_err)?;
        Ok(Json(ExplainQueryOutput {
            backend,
            columns: result.columns,
            plan: result.rows,
        }))
    }

    #[tool(
        name = "dbutils-execute-write",
        description = "Execute an INSERT/UPDATE/DELETE statement (or the equivalent document/key-value write on MongoDB/Redis connections). Requires confirmation=\"CONFIRM_WRITE\" or fails before any driver I/O. Every attempt is audited."
    )]
    async fn dbutils_execute_write(
        &self,
        Parameters(input): Parameters<ExecuteWriteInput>,
    ) -> Result<Json<ExecuteWriteOutput>, McpError> {
        let backend = self.backend_label(&input.connection).await?;
        let result = self
            .handler
            .execute_write(&input.connection, &input.sql, &input.confirmation)
            .await
            .map_err(map_err)?;
        let rows_affected = result.rows_affected.unwrap_or(0);
        Ok(Json(ExecuteWriteOutput {
            backend,
            message: affected_rows_message(rows_affected),
            rows_affected: result.rows_affected,
            last_insert_id: result.last_insert_id,
            execution_time_ms: result.execution_time_ms,
        }))
    }

    #[tool(
        name = "dbutils-get-audit-logs",
        description = "Return audit log records for a connection, optionally filtered by table, operation_type, and status."
    )]
    async fn dbutils_get_audit_logs(
        &self,
        Parameters(input): Parameters<GetAuditLogsInput>,
    ) -> Result<Json<GetAuditLogsOutput>, McpError> {
        let records = self
            .handler
            .get_audit_logs(
                &input.connection,
                input.table.as_deref(),
                input.operation_type,
                input.status,
                input.limit,
            )
            .await
            .map_err(map_err)?;
        let count = records.len();
        Ok(Json(GetAuditLogsOutput { records, count }))
    }
}

impl DbService {
    /// Lowercase backend tag used for the `[<backend>]` labelling
    /// spec.md §6 requires on successful reads.
    async fn backend_label(&self, connection: &str) -> Result<String, McpError> {
        Ok(self.handler.backend_of(connection).map_err(map_err)?.to_string().to_lowercase())
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "db-broker".to_owned(),
                title: Some("DB Broker".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Broker exposing SQLite/PostgreSQL/MySQL/MongoDB/Redis backends as a uniform set of introspection and query tools.\n\
                \n\
                ## Workflow\n\
                1. `dbutils-list-tables` to see what's addressable on a connection.\n\
                2. `dbutils-describe-table`/`dbutils-get-ddl`/`dbutils-list-indexes`/`dbutils-list-constraints`/`dbutils-get-stats` for introspection.\n\
                3. `dbutils-run-query` for reads; `dbutils-explain-query` for a SQL-family query plan.\n\
                4. `dbutils-execute-write` for writes — requires a connection configured `writable: true`, a permission rule covering the table and operation, and the literal `confirmation=\"CONFIRM_WRITE\"`.\n\
                5. `dbutils-get-audit-logs` to review recorded writes.\n\
                \n\
                ## Backend-specific payloads\n\
                For MongoDB/Redis connections, the `sql` argument on `dbutils-run-query`/`dbutils-execute-write` is a JSON-encoded document-query/key-value-command object rather than SQL text. `dbutils-explain-query` only supports SQL-family connections.\n\
                \n\
                ## Errors\n\
                A missing connection name, a denied write, a malformed statement, or a missing confirmation token all surface as typed errors naming the connection and resource involved."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::audit::AuditLog;
    use crate::db::pool::ConnectionManager;
    use crate::db::retry::{RetryConfig, RetryHandler};
    use crate::models::{ConnectionConfig, DatabaseType};
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_service(dir: &tempfile::TempDir) -> DbService {
        let mut configs = HashMap::new();
        configs.insert(
            "c1".to_string(),
            ConnectionConfig::new(
                "c1",
                DatabaseType::Sqlite,
                "sqlite::memory:",
                false,
                None,
                None,
                PoolOptions::default(),
            )
            .unwrap(),
        );
        let pool = Arc::new(ConnectionManager::new(configs, Duration::from_secs(5)));
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")));
        let retry = RetryHandler::new(RetryConfig::default());
        let handler = Arc::new(Handler::new(pool, audit, retry, Duration::from_secs(5)));
        DbService::new(handler)
    }

    #[test]
    fn service_constructs() {
        let dir = tempfile::tempdir().unwrap();
        let _service = test_service(&dir);
    }

    #[test]
    fn server_info_reports_db_broker() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(&dir);
        let info = service.get_info();
        assert_eq!(info.server_info.name, "db-broker");
        assert!(info.capabilities.tools.is_some());
    }
}
