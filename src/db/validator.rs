//! Operation validator (C8): checks that an operation kind, a resource
//! name, and a query are mutually consistent before anything reaches a
//! connection, grounded in `multi_db/permission/validator.py` (closed-set
//! op check, non-empty resource/query checks) and the teacher's
//! `tools/sql_validator.rs` (sqlparser AST classification, generalized
//! here from read-only enforcement to full CRUD-kind matching).

use crate::error::{DbError, DbResult};
use crate::models::{AbstractQuery, DatabaseType, OperationKind};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

pub(crate) fn dialect_for(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseType::Mysql => Box::new(MySqlDialect {}),
        DatabaseType::Sqlite => Box::new(SQLiteDialect {}),
        DatabaseType::MongoDb | DatabaseType::Redis => Box::new(GenericDialect {}),
    }
}

/// Validate that `op`, `resource_name`, and `query` are mutually
/// consistent (spec.md §4.8). Never inspects permissions; that is C7's
/// job entirely.
pub fn validate(op: OperationKind, resource_name: &str, query: &AbstractQuery, db_type: DatabaseType) -> DbResult<()> {
    if resource_name.is_empty() {
        return Err(DbError::query("resource name is required", ""));
    }

    let declared_kind = query.operation_kind();
    if declared_kind != op {
        return Err(DbError::query(
            format!("operation type '{op}' does not match query kind '{declared_kind}'"),
            resource_name,
        ));
    }

    if let AbstractQuery::Sql(sql_query, _) = query {
        validate_sql_operation(op, &sql_query.sql, db_type)?;
    }

    Ok(())
}

/// AST-based check that the first statement's shape agrees with `op`,
/// generalizing the teacher's read-only-only classifier to all four
/// operation kinds.
fn validate_sql_operation(op: OperationKind, sql: &str, db_type: DatabaseType) -> DbResult<()> {
    let dialect = dialect_for(db_type);
    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| DbError::query(format!("failed to parse SQL: {e}"), sql))?;
    let Some(stmt) = statements.first() else {
        return Err(DbError::query("empty SQL statement", sql));
    };

    let matches = match (op, stmt) {
        (OperationKind::Read, Statement::Query(_)) => true,
        (
            OperationKind::Read,
            Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowDatabases { .. }
            | Statement::ShowCreate { .. }
            | Statement::ExplainTable { .. }
            | Statement::Explain { .. },
        ) => true,
        (OperationKind::Insert, Statement::Insert(_)) => true,
        (OperationKind::Update, Statement::Update { .. }) => true,
        (OperationKind::Delete, Statement::Delete(_)) => true,
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(DbError::query(
            format!("operation type '{op}' does not match query: {sql}"),
            sql,
        ))
    }
}

/// Classify a raw SQL statement's operation kind without first knowing
/// one, for callers that must choose between a `Configuration` error and
/// continuing (spec.md §6 `dbutils-run-query`: "rejects non-SELECT with a
/// `Configuration` error").
pub fn classify_sql(sql: &str, db_type: DatabaseType) -> DbResult<OperationKind> {
    let dialect = dialect_for(db_type);
    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| DbError::query(format!("failed to parse SQL: {e}"), sql))?;
    let Some(stmt) = statements.first() else {
        return Err(DbError::query("empty SQL statement", sql));
    };
    Ok(match stmt {
        Statement::Query(_)
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowCreate { .. }
        | Statement::ExplainTable { .. }
        | Statement::Explain { .. } => OperationKind::Read,
        Statement::Insert(_) => OperationKind::Insert,
        Statement::Update { .. } => OperationKind::Update,
        Statement::Delete(_) => OperationKind::Delete,
        other => {
            return Err(DbError::query(format!("unsupported SQL statement: {other}"), sql));
        }
    })
}
