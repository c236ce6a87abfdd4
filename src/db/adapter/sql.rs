//! SQL adapter (C5): relational backends (sqlite/postgres/mysql).
//!
//! Generalizes the teacher's `db/schema.rs` introspection for
//! `list_resources`/`describe_resource`/`get_resource_stats`, and its
//! `tools/sql_validator.rs` AST-classification pattern (here purely
//! lexical, per spec.md §4.5) for `extract_resource_name`.

use super::{
    require_kind, Adapter, ConstraintDescription, FieldDescription, IndexDescription,
    ResourceDescription, ResourceStats, ResourceSummary, UNKNOWN_TABLE,
};
use crate::db::connection::SqlPool;
use crate::db::schema::SchemaInspector;
use crate::db::session::BackendSession;
use crate::error::{DbError, DbResult};
use crate::models::{AbstractQuery, DatabaseType, QueryResult};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SqlAdapter;

fn expect_sql(session: &BackendSession) -> DbResult<&crate::db::connection::SqlSession> {
    match session {
        BackendSession::Sql(s) => Ok(s),
        other => Err(DbError::connection(
            format!("SqlAdapter invoked against a {} connection", other.db_type()),
            "This is an internal routing bug, not a user error",
        )),
    }
}

#[async_trait]
impl Adapter for SqlAdapter {
    async fn execute_query(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        limit: u32,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        require_kind(query, true)?;
        session.execute(query, limit, timeout).await
    }

    async fn execute_write(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        require_kind(query, false)?;
        session.execute(query, 1, timeout).await
    }

    async fn list_resources(&mut self, session: &mut BackendSession) -> DbResult<Vec<ResourceSummary>> {
        let sql = expect_sql(session)?;
        let tables = SchemaInspector::list_tables(sql.pool(), None, true).await?;
        Ok(tables
            .into_iter()
            .map(|t| ResourceSummary {
                name: t.name,
                resource_type: t.table_type.to_string(),
                row_count: t.row_count,
                size_bytes: t.total_size.or(t.size_bytes),
            })
            .collect())
    }

    async fn describe_resource(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceDescription> {
        let sql = expect_sql(session)?;
        let schema = SchemaInspector::describe_table(sql.pool(), name, None).await?;

        let fields = schema
            .columns
            .iter()
            .map(|c| FieldDescription {
                name: c.name.clone(),
                type_name: c.data_type.clone(),
                nullable: c.nullable,
                default_value: c.default_value.clone(),
                is_primary_key: c.is_primary_key,
            })
            .collect();

        let indexes = schema
            .indexes
            .iter()
            .map(|i| IndexDescription {
                name: i.name.clone(),
                columns: i.columns.clone(),
                is_unique: i.is_unique,
                method: i.index_algorithm.clone(),
            })
            .collect();

        let mut constraints: Vec<ConstraintDescription> = schema
            .foreign_keys
            .iter()
            .map(|fk| ConstraintDescription {
                name: fk.name.clone().unwrap_or_else(|| format!("fk_{}", fk.column)),
                kind: "foreign_key".to_string(),
                detail: format!(
                    "{} -> {}.{} (on delete {}, on update {})",
                    fk.column, fk.references_table, fk.references_column, fk.on_delete, fk.on_update
                ),
            })
            .collect();
        if !schema.primary_key.is_empty() {
            constraints.push(ConstraintDescription {
                name: format!("pk_{}", schema.table_name),
                kind: "primary_key".to_string(),
                detail: schema.primary_key.join(", "),
            });
        }

        let native_ddl = native_ddl(sql.pool(), sql.db_type(), &schema.table_name)
            .await
            .unwrap_or_else(|_| Some(reconstruct_ddl(&schema, sql.db_type())));

        Ok(ResourceDescription {
            name: schema.table_name,
            fields,
            indexes,
            constraints,
            native_ddl,
        })
    }

    async fn get_resource_stats(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceStats> {
        let sql = expect_sql(session)?;
        let tables = SchemaInspector::list_tables(sql.pool(), None, true).await?;
        let table = tables
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| DbError::resource_not_found(name, format!("no table named '{name}'")))?;
        Ok(ResourceStats {
            name: table.name,
            row_count: table.row_count,
            total_size_bytes: table.total_size.or(table.size_bytes),
            index_size_bytes: table.index_size,
            extra: table.engine.map(|e| serde_json::json!({ "engine": e })),
        })
    }

    /// Lexical, best-effort, never errors (spec.md §4.5): locate the
    /// token after `INSERT INTO`/`UPDATE`/`DELETE FROM`, or the first
    /// `FROM` of a SELECT, and strip surrounding quotes.
    fn extract_resource_name(&self, query: &AbstractQuery) -> String {
        let AbstractQuery::Sql(q, _) = query else {
            return UNKNOWN_TABLE.to_string();
        };
        extract_table_name(&q.sql).unwrap_or_else(|| UNKNOWN_TABLE.to_string())
    }
}

/// Feature flags derived purely from backend kind (spec.md §4.5).
#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags {
    pub stored_procedures: bool,
    pub views: bool,
    pub triggers: bool,
    pub foreign_keys: bool,
    pub batch_operations: bool,
    pub transactions: bool,
}

pub fn feature_flags(db_type: DatabaseType) -> FeatureFlags {
    match db_type {
        DatabaseType::Sqlite => FeatureFlags {
            stored_procedures: false,
            views: true,
            triggers: true,
            foreign_keys: true,
            batch_operations: true,
            transactions: true,
        },
        DatabaseType::Mysql => FeatureFlags {
            stored_procedures: true,
            views: true,
            triggers: true,
            foreign_keys: true,
            batch_operations: true,
            transactions: true,
        },
        DatabaseType::Postgres => FeatureFlags {
            stored_procedures: true,
            views: true,
            triggers: true,
            foreign_keys: true,
            batch_operations: true,
            transactions: true,
        },
        _ => FeatureFlags {
            stored_procedures: false,
            views: false,
            triggers: false,
            foreign_keys: false,
            batch_operations: false,
            transactions: false,
        },
    }
}

fn quote_ident(name: &str, db_type: DatabaseType) -> String {
    match db_type {
        DatabaseType::Mysql => format!("`{}`", name.replace('`', "``")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Ask the backend for its own CREATE statement where one exists
/// (`SHOW CREATE TABLE` on mysql, `sqlite_master.sql` on sqlite).
/// Postgres has no single-statement equivalent; callers fall back to
/// [`reconstruct_ddl`].
async fn native_ddl(pool: &SqlPool, db_type: DatabaseType, table_name: &str) -> DbResult<Option<String>> {
    match (pool, db_type) {
        (SqlPool::MySql(p), DatabaseType::Mysql) => {
            let query = format!("SHOW CREATE TABLE {}", quote_ident(table_name, db_type));
            use sqlx::Row;
            let row = sqlx::query(&query).fetch_one(p).await.map_err(DbError::from)?;
            let ddl: String = row.try_get(1).map_err(DbError::from)?;
            Ok(Some(ddl))
        }
        (SqlPool::Sqlite(p), DatabaseType::Sqlite) => {
            let row = sqlx::query("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table_name)
                .fetch_optional(p)
                .await
                .map_err(DbError::from)?;
            use sqlx::Row;
            Ok(row.and_then(|r| r.try_get::<Option<String>, _>(0).ok().flatten()))
        }
        _ => Ok(None),
    }
}

/// Generic CREATE TABLE reconstruction from introspected schema, used
/// for postgres (no single-statement native form) and as a fallback.
fn reconstruct_ddl(schema: &crate::models::TableSchema, db_type: DatabaseType) -> String {
    let mut cols = Vec::new();
    for c in &schema.columns {
        let mut line = format!("  {} {}", quote_ident(&c.name, db_type), c.data_type);
        if !c.nullable {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &c.default_value {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        cols.push(line);
    }
    if !schema.primary_key.is_empty() {
        let pk = schema
            .primary_key
            .iter()
            .map(|c| quote_ident(c, db_type))
            .collect::<Vec<_>>()
            .join(", ");
        cols.push(format!("  PRIMARY KEY ({pk})"));
    }
    for fk in &schema.foreign_keys {
        cols.push(format!(
            "  FOREIGN KEY ({}) REFERENCES {}({})",
            quote_ident(&fk.column, db_type),
            quote_ident(&fk.references_table, db_type),
            quote_ident(&fk.references_column, db_type)
        ));
    }
    format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_ident(&schema.table_name, db_type),
        cols.join(",\n")
    )
}

/// Lexical resource-name extraction: find `INSERT INTO`, `UPDATE`,
/// `DELETE FROM`, or the first `FROM` of a `SELECT`, and take the
/// following identifier with surrounding quotes stripped.
fn extract_table_name(sql: &str) -> Option<String> {
    let upper = sql.to_uppercase();
    let (marker, after) = if let Some(pos) = upper.find("INSERT INTO") {
        (pos, pos + "INSERT INTO".len())
    } else if let Some(pos) = upper.find("UPDATE") {
        (pos, pos + "UPDATE".len())
    } else if let Some(pos) = upper.find("DELETE FROM") {
        (pos, pos + "DELETE FROM".len())
    } else if let Some(pos) = upper.find("FROM") {
        (pos, pos + "FROM".len())
    } else {
        return None;
    };
    let _ = marker;
    let rest = sql.get(after..)?.trim_start();
    let token: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '"' || *c == '`')
        .collect();
    if token.is_empty() {
        return None;
    }
    Some(token.trim_matches(|c| c == '"' || c == '`' || c == '\'').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationKind, QueryParam, SqlQuery};
    use std::collections::HashMap;

    fn sql_query(sql: &str) -> AbstractQuery {
        AbstractQuery::Sql(
            SqlQuery {
                sql: sql.to_string(),
                params: HashMap::<String, QueryParam>::new(),
            },
            OperationKind::Read,
        )
    }

    #[test]
    fn extracts_table_from_select() {
        assert_eq!(extract_table_name("SELECT * FROM users WHERE id = 1"), Some("users".to_string()));
    }

    #[test]
    fn extracts_table_from_insert() {
        assert_eq!(extract_table_name("INSERT INTO \"orders\" (id) VALUES (1)"), Some("orders".to_string()));
    }

    #[test]
    fn extracts_table_from_update() {
        assert_eq!(extract_table_name("UPDATE `accounts` SET balance = 0"), Some("accounts".to_string()));
    }

    #[test]
    fn falls_back_to_sentinel_on_garbage() {
        let adapter = SqlAdapter;
        assert_eq!(adapter.extract_resource_name(&sql_query("???")), UNKNOWN_TABLE);
    }

    #[test]
    fn feature_flags_sqlite_has_no_stored_procedures() {
        assert!(!feature_flags(DatabaseType::Sqlite).stored_procedures);
        assert!(feature_flags(DatabaseType::Mysql).stored_procedures);
    }
}
