//! KV adapter (C5): Redis.
//!
//! `list_resources` enumerates via `SCAN`, never `KEYS`, per spec.md
//! §4.5 ("to avoid blocking"); per-key metadata comes from `TYPE`,
//! `TTL`, and `MEMORY USAGE`, grounded in `db/redis.rs`'s own
//! `RedisSession::conn_mut` escape hatch for commands the KV command
//! surface doesn't otherwise model.

use super::{Adapter, ConstraintDescription, FieldDescription, IndexDescription, ResourceDescription, ResourceStats, ResourceSummary, UNKNOWN_TABLE};
use crate::db::session::BackendSession;
use crate::error::{DbError, DbResult};
use crate::models::{AbstractQuery, QueryResult};
use async_trait::async_trait;
use std::time::Duration;

/// Keys returned per `SCAN` round; bounded so `list_resources` never
/// blocks the server on a huge keyspace.
const SCAN_COUNT: u32 = 1000;
const MAX_KEYS: usize = 10_000;

#[derive(Debug, Default)]
pub struct RedisAdapter;

fn expect_redis(session: &mut BackendSession) -> DbResult<&mut crate::db::redis::RedisSession> {
    match session {
        BackendSession::Redis(s) => Ok(s),
        other => Err(DbError::connection(
            format!("RedisAdapter invoked against a {} connection", other.db_type()),
            "This is an internal routing bug, not a user error",
        )),
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    async fn execute_query(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        limit: u32,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        super::require_kind(query, true)?;
        session.execute(query, limit, timeout).await
    }

    async fn execute_write(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        super::require_kind(query, false)?;
        session.execute(query, 1, timeout).await
    }

    async fn list_resources(&mut self, session: &mut BackendSession) -> DbResult<Vec<ResourceSummary>> {
        let redis = expect_redis(session)?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(redis.conn_mut())
                .await
                .map_err(DbError::from)?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 || keys.len() >= MAX_KEYS {
                break;
            }
        }
        keys.truncate(MAX_KEYS);

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let key_type: String = redis::cmd("TYPE")
                .arg(&key)
                .query_async(redis.conn_mut())
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            let size: Option<u64> = redis::cmd("MEMORY")
                .arg("USAGE")
                .arg(&key)
                .query_async(redis.conn_mut())
                .await
                .ok();
            out.push(ResourceSummary {
                name: key,
                resource_type: key_type,
                row_count: None,
                size_bytes: size,
            });
        }
        Ok(out)
    }

    async fn describe_resource(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceDescription> {
        let redis = expect_redis(session)?;
        let key_type: String = redis::cmd("TYPE")
            .arg(name)
            .query_async(redis.conn_mut())
            .await
            .map_err(DbError::from)?;
        if key_type == "none" {
            return Err(DbError::resource_not_found(name, format!("no key named '{name}'")));
        }
        let ttl: i64 = redis::cmd("TTL")
            .arg(name)
            .query_async(redis.conn_mut())
            .await
            .unwrap_or(-1);

        let fields = vec![FieldDescription {
            name: name.to_string(),
            type_name: key_type,
            nullable: false,
            default_value: None,
            is_primary_key: true,
        }];
        let constraints = if ttl >= 0 {
            vec![ConstraintDescription {
                name: format!("ttl_{name}"),
                kind: "ttl".to_string(),
                detail: format!("{ttl}s remaining"),
            }]
        } else {
            Vec::new()
        };

        Ok(ResourceDescription {
            name: name.to_string(),
            fields,
            indexes: Vec::<IndexDescription>::new(),
            constraints,
            native_ddl: None,
        })
    }

    async fn get_resource_stats(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceStats> {
        let redis = expect_redis(session)?;
        let size: Option<u64> = redis::cmd("MEMORY")
            .arg("USAGE")
            .arg(name)
            .query_async(redis.conn_mut())
            .await
            .map_err(DbError::from)?;
        if size.is_none() {
            return Err(DbError::resource_not_found(name, format!("no key named '{name}'")));
        }
        Ok(ResourceStats {
            name: name.to_string(),
            row_count: None,
            total_size_bytes: size,
            index_size_bytes: None,
            extra: None,
        })
    }

    /// KV commands carry their key directly (spec.md §3); no parsing needed.
    fn extract_resource_name(&self, query: &AbstractQuery) -> String {
        match query {
            AbstractQuery::Kv(cmd) => cmd.key.clone(),
            _ => UNKNOWN_TABLE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KvCommand, KvCommandName};

    #[test]
    fn extract_resource_name_uses_key_field() {
        let adapter = RedisAdapter;
        let query = AbstractQuery::Kv(KvCommand {
            command: KvCommandName::Get,
            key: "session:42".to_string(),
            args: Vec::new(),
        });
        assert_eq!(adapter.extract_resource_name(&query), "session:42");
    }
}
