//! Data models for the DB MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    AllowedOp, ConnectionConfig, ConnectionConfigError, ConnectionInfo, DatabaseType,
    DefaultPolicy, OperationKind, ResourceClass, ResourceRule, TransactionState, WritePermissions,
};
pub use query::{
    AbstractQuery, ColumnMetadata, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, DocOperation,
    DocumentQuery, KvCommand, KvCommandName, MAX_QUERY_TIMEOUT_SECS, MAX_ROW_LIMIT, QueryParam,
    QueryParamInput, QueryResult, SqlQuery, effective_limit, effective_timeout,
};
pub use schema::{
    ColumnDefinition, DescribeTableRequest, ForeignKey, ForeignKeyAction, IndexInfo,
    ListTablesRequest, TableInfo, TableSchema, TableType,
};
