//! Error types for the broker.
//!
//! `DbError` is a closed sum type carried across every layer: adapters,
//! the connection pool, the permission checker, the audit log, and the
//! handler all return `DbResult<T>`. No panics or out-of-band exceptions
//! cross module boundaries; `Connection` is the only variant retried by
//! default (see `db::retry`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Root/catch-all database failure not covered by a more specific variant.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g. "42P01" for postgres undefined table; backend-specific.
        code: Option<String>,
        suggestion: Option<String>,
    },

    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        suggestion: Option<String>,
    },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("{resource} not found: {message}")]
    ResourceNotFound { resource: String, message: String },

    #[error("Duplicate key on {resource}: {message}")]
    DuplicateKey { resource: String, message: String },

    #[error("Permission denied: {operation} on {resource} for connection '{connection}' - {reason}")]
    Permission {
        connection: String,
        resource: String,
        operation: String,
        reason: String,
    },

    #[error("Query error: {message}")]
    Query { message: String, query: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Not implemented: {message}")]
    NotImplemented { message: String },
}

impl DbError {
    pub fn database(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            code,
            suggestion,
        }
    }

    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn resource_not_found(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn duplicate_key(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DuplicateKey {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn permission(
        connection: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Permission {
            connection: connection.into(),
            resource: resource.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn query(message: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            query: query.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Suggestion for the caller, when one exists.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Database { suggestion, .. } => suggestion.as_deref(),
            Self::Connection { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    /// Only `Connection` is retryable by default; `RetryHandler` may be
    /// configured with a wider retryable set (spec.md §4.10).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Short machine-stable name of the variant, used for the handler's
    /// error histogram (spec.md §4.11 step 3) and audit error fields.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Database { .. } => "Database",
            Self::Connection { .. } => "Connection",
            Self::Authentication { .. } => "Authentication",
            Self::Configuration { .. } => "Configuration",
            Self::ResourceNotFound { .. } => "ResourceNotFound",
            Self::DuplicateKey { .. } => "DuplicateKey",
            Self::Permission { .. } => "Permission",
            Self::Query { .. } => "Query",
            Self::Transaction { .. } => "Transaction",
            Self::NotImplemented { .. } => "NotImplemented",
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DbError::duplicate_key("unknown", db_err.message())
                } else {
                    let code = db_err.code().map(|c| c.to_string());
                    DbError::database(db_err.message(), code, Some("Check the SQL syntax and referenced objects".into()))
                }
            }
            sqlx::Error::RowNotFound => {
                DbError::resource_not_found("row", "No rows returned for the given query")
            }
            sqlx::Error::PoolTimedOut => {
                DbError::connection("Timed out waiting for a pooled connection", "Increase pool size or timeout")
            }
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {io_err}"),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {tls_err}"),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => {
                DbError::connection(format!("Protocol error: {msg}"), "Check database server compatibility")
            }
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::resource_not_found("type", format!("Type not found: {type_name}"))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::resource_not_found("column", format!("Column not found: {col}"))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                DbError::query(format!("Column index {index} out of bounds (len: {len})"), "")
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::query(format!("Failed to decode column {index}: {source}"), "")
            }
            sqlx::Error::Decode(source) => DbError::query(format!("Decode error: {source}"), ""),
            sqlx::Error::AnyDriverError(err) => {
                DbError::connection(format!("Driver error: {err}"), "Check database driver configuration")
            }
            sqlx::Error::Migrate(e) => DbError::configuration(format!("Migration error: {e}")),
            sqlx::Error::WorkerCrashed => DbError::connection("Database worker crashed", "Reconnect to the database"),
            other => DbError::database(format!("Unexpected database error: {other}"), None, None),
        }
    }
}

impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::Authentication { message, .. } => DbError::authentication(message.clone()),
            ErrorKind::Io(io_err) => DbError::connection(
                format!("I/O error: {io_err}"),
                "Check network connectivity and the mongod/mongos server status",
            ),
            ErrorKind::ServerSelection { message, .. } => DbError::connection(
                message.clone(),
                "Check that the deployment is reachable and the URI is correct",
            ),
            ErrorKind::Write(write_failure) => {
                let msg = format!("{write_failure:?}");
                if msg.contains("E11000") || msg.to_lowercase().contains("duplicate key") {
                    DbError::duplicate_key("document", msg)
                } else {
                    DbError::database(msg, None, None)
                }
            }
            _ => DbError::database(err.to_string(), None, None),
        }
    }
}

impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            DbError::connection(err.to_string(), "Check that the redis server is reachable")
        } else if err.kind() == redis::ErrorKind::AuthenticationFailed {
            DbError::authentication(err.to_string())
        } else {
            DbError::database(err.to_string(), err.code().map(str::to_string), None)
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::Configuration { .. }
            | DbError::Permission { .. }
            | DbError::Query { .. }
            | DbError::DuplicateKey { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }
            DbError::ResourceNotFound { .. } | DbError::Transaction { .. } => {
                rmcp::ErrorData::resource_not_found(err.to_string(), suggestion_data(err.suggestion()))
            }
            DbError::Authentication { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), None)
            }
            DbError::NotImplemented { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), None)
            }
            DbError::Connection { suggestion, .. } => rmcp::ErrorData::internal_error(
                err.to_string(),
                suggestion_data(suggestion.as_deref()),
            ),
            DbError::Database { suggestion, code, message } => {
                let msg = match code {
                    Some(c) => format!("{message} (code: {c})"),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, suggestion_data(suggestion.as_deref()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_is_retryable() {
        assert!(DbError::connection("down", "retry").is_retryable());
        assert!(!DbError::permission("c1", "users", "DELETE", "no rule").is_retryable());
    }

    #[test]
    fn variant_names_are_stable() {
        assert_eq!(DbError::transaction("x").variant_name(), "Transaction");
        assert_eq!(
            DbError::permission("c1", "t", "INSERT", "r").variant_name(),
            "Permission"
        );
    }

    #[test]
    fn permission_maps_to_invalid_params() {
        let err = DbError::permission("c2", "users", "DELETE", "no matching rule");
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32602);
        assert!(mcp_err.message.contains("users"));
        assert!(mcp_err.message.contains("DELETE"));
    }

    #[test]
    fn resource_not_found_maps_to_resource_not_found() {
        let err = DbError::resource_not_found("table", "orders missing");
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32002);
    }

    #[test]
    fn connection_maps_to_internal_error() {
        let err = DbError::connection("refused", "retry later");
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32603);
        let data = mcp_err.data.unwrap();
        assert_eq!(data["suggestion"], "retry later");
    }

    #[test]
    fn database_error_includes_code() {
        let err = DbError::database("syntax error", Some("42601".into()), None);
        let mcp_err: rmcp::ErrorData = err.into();
        assert!(mcp_err.message.contains("42601"));
    }
}
