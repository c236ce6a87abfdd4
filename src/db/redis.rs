//! Redis backend session: a thin stateful wrapper over `redis::aio::ConnectionManager`.
//!
//! Redis has no native multi-statement transaction with savepoints; the
//! closest primitive is a pipeline issued as `MULTI ... EXEC` (spec.md
//! §4.3 KV dispatch: "inside a transaction, operations are enqueued on a
//! pipeline ... `commit()` drains it"). `RedisSession` buffers commands
//! into a `redis::Pipeline` while a transaction is open and executes it
//! atomically on `commit`.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, KvCommand, KvCommandName, QueryParam, QueryResult};
use redis::aio::ConnectionManager;
use redis::{Pipeline, Value as RedisValue};
use std::time::Duration;

pub struct RedisSession {
    conn: ConnectionManager,
    pipeline: Option<Pipeline>,
    writable: bool,
}

impl RedisSession {
    pub fn new(conn: ConnectionManager, writable: bool) -> Self {
        Self {
            conn,
            pipeline: None,
            writable,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn transaction_active(&self) -> bool {
        self.pipeline.is_some()
    }

    pub async fn check_health(&mut self) -> DbResult<()> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(DbError::from)
    }

    /// Redis lacks nested transactions or savepoints (spec.md §9
    /// acknowledges Mongo/Redis as partial-support backends); a second
    /// `begin_transaction` while one is open is rejected rather than
    /// silently reusing the open pipeline.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.pipeline.is_some() {
            return Err(DbError::not_implemented(
                "Redis does not support nested transactions or savepoints",
            ));
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.pipeline = Some(pipe);
        Ok(())
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let pipe = self
            .pipeline
            .take()
            .ok_or_else(|| DbError::transaction("no active transaction to commit"))?;
        pipe.query_async::<Vec<RedisValue>>(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(DbError::from)
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        if self.pipeline.take().is_none() {
            return Err(DbError::transaction("no active transaction to roll back"));
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        let _ = self.pipeline.take();
    }

    pub async fn execute_command(
        &mut self,
        command: &KvCommand,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        let started = std::time::Instant::now();
        let fut = self.dispatch(command);
        let mut result = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| DbError::query("redis command timed out", &command.key))??;
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn dispatch(&mut self, command: &KvCommand) -> DbResult<QueryResult> {
        let mut cmd = build_command(command)?;

        if let Some(pipe) = self.pipeline.as_mut() {
            pipe.add_command(cmd);
            return Ok(QueryResult::write_result(0, None, 0));
        }

        let value: RedisValue = cmd.query_async(&mut self.conn).await.map_err(DbError::from)?;
        Ok(value_to_result(command, value))
    }

    pub fn conn_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }
}

/// Translate a `KvCommand` into a `redis::Cmd`, matching the closed list
/// of recognised commands in spec.md §4.3 (unknown commands never reach
/// here; `KvCommandName` is a closed enum rejected at deserialization).
fn build_command(command: &KvCommand) -> DbResult<redis::Cmd> {
    use KvCommandName::*;
    let mut cmd = redis::cmd(command_name(command.command));
    if command.command == MemoryUsage {
        // MEMORY is a container command; USAGE is the subcommand we want.
        cmd.arg("USAGE");
    }
    cmd.arg(&command.key);
    for arg in &command.args {
        arg_into_cmd(&mut cmd, arg)?;
    }
    match command.command {
        Scan | Keys => {
            // SCAN/KEYS address a pattern rather than `key`; the key
            // field doubles as the cursor/pattern for these two.
        }
        _ => {}
    }
    Ok(cmd)
}

fn command_name(name: KvCommandName) -> &'static str {
    use KvCommandName::*;
    match name {
        Get => "GET",
        Set => "SET",
        Del => "DEL",
        Exists => "EXISTS",
        Type => "TYPE",
        Ttl => "TTL",
        Expire => "EXPIRE",
        Keys => "KEYS",
        Scan => "SCAN",
        HGet => "HGET",
        HSet => "HSET",
        HGetAll => "HGETALL",
        HMGet => "HMGET",
        HDel => "HDEL",
        LRange => "LRANGE",
        LPush => "LPUSH",
        RPush => "RPUSH",
        SMembers => "SMEMBERS",
        SAdd => "SADD",
        SRem => "SREM",
        ZRange => "ZRANGE",
        ZAdd => "ZADD",
        ZRem => "ZREM",
        Incr => "INCR",
        Decr => "DECR",
        MemoryUsage => "MEMORY",
    }
}

fn arg_into_cmd(cmd: &mut redis::Cmd, param: &QueryParam) -> DbResult<()> {
    match param {
        QueryParam::Null => Err(DbError::query("redis arguments cannot be null", "")),
        QueryParam::Bool(b) => {
            cmd.arg(if *b { "1" } else { "0" });
            Ok(())
        }
        QueryParam::Int(i) => {
            cmd.arg(*i);
            Ok(())
        }
        QueryParam::Float(f) => {
            cmd.arg(*f);
            Ok(())
        }
        QueryParam::String(s) => {
            cmd.arg(s.as_str());
            Ok(())
        }
        QueryParam::Json(v) => {
            cmd.arg(v.to_string());
            Ok(())
        }
    }
}

fn value_to_result(command: &KvCommand, value: RedisValue) -> QueryResult {
    if command.command.operation_kind() != crate::models::OperationKind::Read {
        let affected = match &value {
            RedisValue::Int(n) => *n as u64,
            RedisValue::Okay => 1,
            _ => 0,
        };
        return QueryResult::write_result(affected, None, 0);
    }

    let mut map = serde_json::Map::new();
    map.insert("value".to_string(), redis_value_to_json(&value));
    QueryResult {
        columns: vec![ColumnMetadata::new("value", "redis", true)],
        rows: vec![map],
        rows_affected: None,
        last_insert_id: None,
        truncated: false,
        execution_time_ms: 0,
    }
}

fn redis_value_to_json(value: &RedisValue) -> serde_json::Value {
    match value {
        RedisValue::Nil => serde_json::Value::Null,
        RedisValue::Int(i) => serde_json::Value::from(*i),
        RedisValue::Double(d) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        RedisValue::BulkString(bytes) => String::from_utf8(bytes.clone())
            .map(serde_json::Value::String)
            .unwrap_or_else(|_| serde_json::Value::String(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                bytes,
            ))),
        RedisValue::Okay => serde_json::Value::String("OK".to_string()),
        RedisValue::SimpleString(s) => serde_json::Value::String(s.clone()),
        RedisValue::Boolean(b) => serde_json::Value::Bool(*b),
        RedisValue::Array(items) | RedisValue::Set(items) => {
            serde_json::Value::Array(items.iter().map(redis_value_to_json).collect())
        }
        RedisValue::Map(pairs) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in pairs {
                let key = match redis_value_to_json(k) {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                obj.insert(key, redis_value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
        _ => serde_json::Value::Null,
    }
}

/// Open a Redis connection manager for the given connection string.
pub async fn create_redis_connection(connection_string: &str) -> DbResult<ConnectionManager> {
    let client = redis::Client::open(connection_string)
        .map_err(|e| DbError::connection(format!("Invalid Redis connection string: {e}"), "Check the connection URL format: redis://[:password@]host:port/db"))?;
    client
        .get_connection_manager()
        .await
        .map_err(DbError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KvCommand, KvCommandName};

    #[test]
    fn command_names_cover_closed_set() {
        assert_eq!(command_name(KvCommandName::Get), "GET");
        assert_eq!(command_name(KvCommandName::HGetAll), "HGETALL");
        assert_eq!(command_name(KvCommandName::MemoryUsage), "MEMORY");
    }

    #[test]
    fn memory_usage_command_gets_usage_subcommand() {
        let command = KvCommand {
            command: KvCommandName::MemoryUsage,
            key: "session:1".into(),
            args: vec![],
        };
        let cmd = build_command(&command).unwrap();
        let packed = String::from_utf8_lossy(&cmd.get_packed_command()).into_owned();
        let usage_pos = packed.find("USAGE").expect("USAGE subcommand present");
        let key_pos = packed.find("session:1").expect("key present");
        assert!(usage_pos < key_pos, "expected MEMORY USAGE <key>, got {packed:?}");
    }

    #[test]
    fn build_command_rejects_null_args() {
        let command = KvCommand {
            command: KvCommandName::Set,
            key: "k".into(),
            args: vec![QueryParam::Null],
        };
        assert!(build_command(&command).is_err());
    }
}
