//! `BackendSession`: the tagged-variant `Connection` (C3) spanning all
//! five backend kinds, replacing the teacher's per-backend inheritance
//! with a single sum type and a shared entry surface (spec.md §9's
//! "dynamic dispatch over backend kinds" redesign flag).

use crate::config::PoolOptions;
use crate::db::connection::{create_sql_pool, SqlSession};
use crate::db::mongo::MongoSession;
use crate::db::redis::{create_redis_connection, RedisSession};
use crate::error::{DbError, DbResult};
use crate::models::{AbstractQuery, ConnectionConfig, DatabaseType, OperationKind, QueryResult};
use std::time::Duration;

/// One connected backend session, selected by `ConnectionConfig::db_type`.
pub enum BackendSession {
    Sql(SqlSession),
    Mongo(MongoSession),
    Redis(RedisSession),
}

impl BackendSession {
    /// Connect a fresh session from a `ConnectionConfig` (spec.md §4.3:
    /// "created by a factory from a `ConnectionConfig`").
    pub async fn connect(config: &ConnectionConfig, connect_timeout: Duration) -> DbResult<Self> {
        let opts: PoolOptions = config.pool_options;
        match config.db_type {
            DatabaseType::Sqlite | DatabaseType::Postgres | DatabaseType::Mysql => {
                let pool = create_sql_pool(
                    config.db_type,
                    &config.connection_string,
                    config.writable,
                    opts.max_connections,
                    Duration::from_secs(opts.acquire_timeout_secs),
                )
                .await?;
                Ok(Self::Sql(SqlSession::new(pool, config.writable)))
            }
            DatabaseType::MongoDb => {
                let client_opts = mongodb::options::ClientOptions::parse(&config.connection_string)
                    .await
                    .map_err(DbError::from)?;
                let client = mongodb::Client::with_options(client_opts).map_err(DbError::from)?;
                let db_name = config
                    .database
                    .clone()
                    .or_else(|| client.default_database().map(|d| d.name().to_string()))
                    .ok_or_else(|| {
                        DbError::configuration("mongodb connection needs an explicit database name")
                    })?;
                tokio::time::timeout(connect_timeout, async {
                    client.database(&db_name).run_command(bson::doc! { "ping": 1 }).await
                })
                .await
                .map_err(|_| DbError::connection("timed out connecting to mongodb", "Check network reachability and the URI"))?
                .map_err(DbError::from)?;
                Ok(Self::Mongo(MongoSession::new(client, db_name, config.writable)))
            }
            DatabaseType::Redis => {
                let conn = tokio::time::timeout(
                    connect_timeout,
                    create_redis_connection(&config.connection_string),
                )
                .await
                .map_err(|_| DbError::connection("timed out connecting to redis", "Check network reachability and the URI"))??;
                Ok(Self::Redis(RedisSession::new(conn, config.writable)))
            }
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::Sql(s) => s.db_type(),
            Self::Mongo(_) => DatabaseType::MongoDb,
            Self::Redis(_) => DatabaseType::Redis,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Self::Sql(s) => s.is_writable(),
            Self::Mongo(s) => s.is_writable(),
            Self::Redis(s) => s.is_writable(),
        }
    }

    pub fn transaction_active(&self) -> bool {
        match self {
            Self::Sql(s) => s.transaction_active(),
            Self::Mongo(s) => s.transaction_active(),
            Self::Redis(s) => s.transaction_active(),
        }
    }

    /// I1/I2 (spec.md §4.3): rolls back any open transaction first, then
    /// tears down the driver handle. Never raises on a closed handle.
    pub async fn disconnect(&mut self) {
        match self {
            Self::Sql(s) => s.disconnect().await,
            Self::Mongo(s) => s.disconnect().await,
            Self::Redis(s) => s.disconnect().await,
        }
    }

    pub async fn check_health(&mut self) -> DbResult<()> {
        match self {
            Self::Sql(s) => s.check_health().await,
            Self::Mongo(s) => s.check_health().await,
            Self::Redis(s) => s.check_health().await,
        }
    }

    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        match self {
            Self::Sql(s) => s.begin_transaction().await,
            Self::Mongo(s) => s.begin_transaction().await,
            Self::Redis(s) => s.begin_transaction().await,
        }
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        match self {
            Self::Sql(s) => s.commit().await,
            Self::Mongo(s) => s.commit().await,
            Self::Redis(s) => s.commit().await,
        }
    }

    /// Only the SQL family supports named savepoints (spec.md §4.3); a
    /// savepoint-qualified rollback against Mongo/Redis is a `NotImplemented`
    /// error rather than a silent top-level rollback.
    pub async fn rollback(&mut self, savepoint: Option<&str>) -> DbResult<()> {
        match self {
            Self::Sql(s) => s.rollback(savepoint).await,
            Self::Mongo(s) => {
                if savepoint.is_some() {
                    return Err(DbError::not_implemented("MongoDB has no savepoints"));
                }
                s.rollback().await
            }
            Self::Redis(s) => {
                if savepoint.is_some() {
                    return Err(DbError::not_implemented("Redis has no savepoints"));
                }
                s.rollback().await
            }
        }
    }

    pub async fn execute(
        &mut self,
        query: &AbstractQuery,
        limit: u32,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        match (self, query) {
            (Self::Sql(session), AbstractQuery::Sql(q, kind)) => {
                let (native_sql, ordered) = crate::db::params::rewrite_named_placeholders(
                    &q.sql,
                    &q.params,
                    session.db_type(),
                )?;
                session
                    .execute_sql(&native_sql, &ordered, *kind == OperationKind::Read, limit, timeout)
                    .await
            }
            (Self::Mongo(session), AbstractQuery::Document(q)) => {
                session.execute_query(q, limit, timeout).await
            }
            (Self::Redis(session), AbstractQuery::Kv(cmd)) => {
                session.execute_command(cmd, timeout).await
            }
            _ => Err(DbError::connection(
                "abstract query variant does not match this connection's backend kind",
                "This is an internal routing bug, not a user error",
            )),
        }
    }
}
