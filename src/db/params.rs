//! Parameter binding utilities for database queries.
//!
//! `rewrite_named_placeholders` implements spec.md §4.3's dialect-specific
//! placeholder styles (`:name` for sqlite/mysql, `%(name)s` for postgres):
//! it scans the statement text for occurrences in left-to-right order and
//! rewrites them into each dialect's native positional marker (`?` for
//! sqlite/mysql, `$1`, `$2`, ... for postgres), producing the ordered
//! parameter vector `SqlSession::execute_sql` binds positionally.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::HashMap;

pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

/// Rewrite `:name` (sqlite/mysql) or `%(name)s` (postgres) placeholders
/// into the dialect's native positional marker, skipping occurrences
/// inside single-quoted string literals so a literal value containing
/// `:foo` is never mistaken for a bind marker. Returns the rewritten SQL
/// plus the parameter vector in bind order. An unresolvable name (absent
/// from `params`) is a `Query` error, not a panic.
pub fn rewrite_named_placeholders(
    sql: &str,
    params: &HashMap<String, QueryParam>,
    db_type: DatabaseType,
) -> DbResult<(String, Vec<QueryParam>)> {
    match db_type {
        DatabaseType::Postgres => rewrite_percent_style(sql, params),
        _ => rewrite_colon_style(sql, params, db_type),
    }
}

fn rewrite_colon_style(
    sql: &str,
    params: &HashMap<String, QueryParam>,
    db_type: DatabaseType,
) -> DbResult<(String, Vec<QueryParam>)> {
    let mut out = String::with_capacity(sql.len());
    let mut ordered = Vec::new();
    let mut in_string = false;
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if !in_string && c == ':' && i + 1 < chars.len() && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            let value = params.get(&name).ok_or_else(|| {
                DbError::query(format!("no parameter bound for :{name}"), sql)
            })?;
            out.push_str(match db_type {
                DatabaseType::Mysql | DatabaseType::Sqlite => "?",
                _ => "?",
            });
            ordered.push(value.clone());
            i = end;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Ok((out, ordered))
}

fn rewrite_percent_style(
    sql: &str,
    params: &HashMap<String, QueryParam>,
) -> DbResult<(String, Vec<QueryParam>)> {
    let mut out = String::with_capacity(sql.len());
    let mut ordered = Vec::new();
    let mut in_string = false;
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut next_index = 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if !in_string && c == '%' && chars.get(i + 1) == Some(&'(') {
            let start = i + 2;
            let Some(close_rel) = chars[start..].iter().position(|&c| c == ')') else {
                out.push(c);
                i += 1;
                continue;
            };
            let close = start + close_rel;
            if chars.get(close + 1) != Some(&'s') {
                out.push(c);
                i += 1;
                continue;
            }
            let name: String = chars[start..close].iter().collect();
            let value = params.get(&name).ok_or_else(|| {
                DbError::query(format!("no parameter bound for %({name})s"), sql)
            })?;
            out.push_str(&format!("${next_index}"));
            next_index += 1;
            ordered.push(value.clone());
            i = close + 2;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Ok((out, ordered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_style_rewrites_in_order() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), QueryParam::Int(1));
        params.insert("name".to_string(), QueryParam::String("a".into()));
        let (sql, ordered) = rewrite_named_placeholders(
            "SELECT * FROM t WHERE id = :id AND name = :name",
            &params,
            DatabaseType::Sqlite,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = ? AND name = ?");
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn colon_style_ignores_literal_colons_in_strings() {
        let params = HashMap::new();
        let (sql, ordered) = rewrite_named_placeholders(
            "SELECT * FROM t WHERE label = 'a:b'",
            &params,
            DatabaseType::Mysql,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE label = 'a:b'");
        assert!(ordered.is_empty());
    }

    #[test]
    fn percent_style_rewrites_to_dollar_positions() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), QueryParam::Int(7));
        let (sql, ordered) = rewrite_named_placeholders(
            "SELECT * FROM t WHERE id = %(id)s",
            &params,
            DatabaseType::Postgres,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = $1");
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn missing_parameter_is_query_error() {
        let params = HashMap::new();
        let result = rewrite_named_placeholders(
            "SELECT * FROM t WHERE id = :id",
            &params,
            DatabaseType::Sqlite,
        );
        assert!(result.is_err());
    }
}
