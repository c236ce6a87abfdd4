//! Adapter (C5): the uniform operation surface over one `BackendSession`
//! (spec.md §4.5). One concrete implementation per backend kind, bound
//! together behind the `Adapter` trait so the handler (C11) never
//! matches on backend kind itself.

pub mod mongo;
pub mod redis;
pub mod sql;

use crate::db::session::BackendSession;
use crate::error::DbResult;
use crate::models::{AbstractQuery, OperationKind, QueryResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;

/// A single entry in `list_resources`' output (spec.md §4.5: "ordered
/// list of records with at minimum `name`, `type`, and backend-specific
/// stats").
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ResourceSummary {
    pub name: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Output of `describe_resource` (spec.md §4.5): "columns/fields/keys,
/// indexes, constraints/ttl" rendered as a backend-agnostic JSON shape
/// the tool layer formats for its particular tool (schema dump, DDL,
/// index listing, constraint listing).
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ResourceDescription {
    pub name: String,
    pub fields: Vec<FieldDescription>,
    pub indexes: Vec<IndexDescription>,
    pub constraints: Vec<ConstraintDescription>,
    /// Backend-native CREATE statement / reconstruction, when available
    /// (spec.md §6 `dbutils-get-ddl`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_ddl: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FieldDescription {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct IndexDescription {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConstraintDescription {
    pub name: String,
    pub kind: String,
    pub detail: String,
}

/// Resource-level statistics (spec.md §4.5 `get_resource_stats`).
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ResourceStats {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Sentinel returned by `extract_resource_name` on a parse failure
/// (spec.md §4.5: "never an error").
pub const UNKNOWN_TABLE: &str = "unknown_table";

/// Uniform backend operation surface (spec.md §4.5).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Rejects a non-READ query with `Query` (spec.md §4.5 read/write
    /// partitioning).
    async fn execute_query(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        limit: u32,
        timeout: std::time::Duration,
    ) -> DbResult<QueryResult>;

    /// Rejects a READ query with `Query` symmetrically.
    async fn execute_write(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        timeout: std::time::Duration,
    ) -> DbResult<QueryResult>;

    async fn list_resources(&mut self, session: &mut BackendSession) -> DbResult<Vec<ResourceSummary>>;

    async fn describe_resource(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceDescription>;

    async fn get_resource_stats(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceStats>;

    /// Best-effort, never-fails lexical extraction; returns
    /// [`UNKNOWN_TABLE`] rather than an error on any parse failure.
    fn extract_resource_name(&self, query: &AbstractQuery) -> String;
}

/// Shared guard both `execute_query`/`execute_write` call first (spec.md
/// §4.5): classification is purely lexical/tag-based, already computed
/// on `AbstractQuery::operation_kind`.
pub(crate) fn require_kind(
    query: &AbstractQuery,
    wanted_read: bool,
) -> DbResult<()> {
    let is_read = query.operation_kind() == OperationKind::Read;
    if is_read != wanted_read {
        let which = if wanted_read { "execute_query" } else { "execute_write" };
        return Err(crate::error::DbError::query(
            format!(
                "{which} called with a query classified as {}",
                query.operation_kind()
            ),
            describe_query(query),
        ));
    }
    Ok(())
}

fn describe_query(query: &AbstractQuery) -> String {
    match query {
        AbstractQuery::Sql(q, _) => q.sql.clone(),
        AbstractQuery::Document(q) => format!("{:?} on {}", q.operation, q.collection),
        AbstractQuery::Kv(c) => format!("{:?} {}", c.command, c.key),
    }
}
