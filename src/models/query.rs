//! Query-related data models.
//!
//! Defines parameter values, the three abstract query variants (spec.md
//! §3: SQL-query / document-query / kv-command), and the result shapes
//! adapters return.

use crate::models::connection::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

pub const DEFAULT_ROW_LIMIT: u32 = 100;
pub const MAX_ROW_LIMIT: u32 = 10000;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u32 = 30;
pub const MAX_QUERY_TIMEOUT_SECS: u32 = 300;

/// A parameter value for parameterized SQL queries.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range.
    Int(i64),
    Float(f64),
    String(String),
    /// Bound as a native JSON column where the backend supports one
    /// (postgres/mysql), stringified otherwise (sqlite).
    Json(JsonValue),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

/// Alias kept distinct in name for MCP tool input schemas (spec.md §6
/// tool argument tables accept the same shape as the internal binding
/// type; there is no separate wire representation worth maintaining).
pub type QueryParamInput = QueryParam;

/// A parameterized SQL statement plus its named parameter map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlQuery {
    pub sql: String,
    #[serde(default)]
    pub params: HashMap<String, QueryParam>,
}

/// MongoDB operation tag (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocOperation {
    Find,
    FindOne,
    Aggregate,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Distinct,
    Count,
}

impl DocOperation {
    /// READ iff the tag is one of {find, find_one, aggregate, distinct, count}
    /// (spec.md §4.5 read/write partitioning rule).
    pub fn operation_kind(&self) -> OperationKind {
        match self {
            Self::Find | Self::FindOne | Self::Aggregate | Self::Distinct | Self::Count => {
                OperationKind::Read
            }
            Self::InsertOne | Self::InsertMany => OperationKind::Insert,
            Self::UpdateOne | Self::UpdateMany => OperationKind::Update,
            Self::DeleteOne | Self::DeleteMany => OperationKind::Delete,
        }
    }
}

/// `{operation, collection, params}` record (spec.md §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub operation: DocOperation,
    pub collection: String,
    #[serde(default)]
    pub params: JsonValue,
}

/// The closed set of KV commands recognised by the Redis adapter (spec.md
/// §4.5). Unknown commands are rejected with a `Connection` error at
/// dispatch time, not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum KvCommandName {
    Get,
    Set,
    Del,
    Exists,
    Type,
    Ttl,
    Expire,
    Keys,
    Scan,
    HGet,
    HSet,
    HGetAll,
    HMGet,
    HDel,
    LRange,
    LPush,
    RPush,
    SMembers,
    SAdd,
    SRem,
    ZRange,
    ZAdd,
    ZRem,
    Incr,
    Decr,
    MemoryUsage,
}

impl KvCommandName {
    /// READ iff the command is in the predefined read set (spec.md §4.5).
    pub fn operation_kind(&self) -> OperationKind {
        use KvCommandName::*;
        match self {
            Get | HGet | HGetAll | HMGet | LRange | SMembers | ZRange | Exists | Type | Ttl
            | Keys | Scan | MemoryUsage => OperationKind::Read,
            Del | HDel | SRem | ZRem => OperationKind::Delete,
            Set | HSet | LPush | RPush | SAdd | ZAdd | Expire | Incr | Decr => {
                OperationKind::Update
            }
        }
    }
}

/// `command name + key + argument list` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvCommand {
    pub command: KvCommandName,
    pub key: String,
    #[serde(default)]
    pub args: Vec<QueryParam>,
}

/// One of the three abstract query variants, each carrying an operation
/// kind for permission checks (spec.md §3).
#[derive(Debug, Clone)]
pub enum AbstractQuery {
    Sql(SqlQuery, OperationKind),
    Document(DocumentQuery),
    Kv(KvCommand),
}

impl AbstractQuery {
    pub fn operation_kind(&self) -> OperationKind {
        match self {
            Self::Sql(_, kind) => *kind,
            Self::Document(doc) => doc.operation.operation_kind(),
            Self::Kv(cmd) => cmd.command.operation_kind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ColumnMetadata {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// Result of `execute_query`/`execute_write` (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty(execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: None,
            last_insert_id: None,
            truncated: false,
            execution_time_ms,
        }
    }

    pub fn write_result(
        rows_affected: u64,
        last_insert_id: Option<i64>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
            last_insert_id,
            truncated: false,
            execution_time_ms,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.rows_affected.is_none()
    }
}

/// Effective bounds helpers shared by the tool layer.
pub fn effective_limit(limit: Option<u32>) -> u32 {
    limit.map(|l| l.min(MAX_ROW_LIMIT)).unwrap_or(DEFAULT_ROW_LIMIT)
}

pub fn effective_timeout(timeout_secs: Option<u32>) -> u32 {
    timeout_secs
        .map(|t| t.min(MAX_QUERY_TIMEOUT_SECS))
        .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_type_names() {
        assert!(QueryParam::Null.is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::Json(JsonValue::Null).type_name(), "json");
    }

    #[test]
    fn effective_bounds_clamp() {
        assert_eq!(effective_limit(Some(999_999)), MAX_ROW_LIMIT);
        assert_eq!(effective_limit(None), DEFAULT_ROW_LIMIT);
        assert_eq!(effective_timeout(Some(9999)), MAX_QUERY_TIMEOUT_SECS);
    }

    #[test]
    fn doc_operation_kind_partitioning() {
        assert_eq!(DocOperation::Find.operation_kind(), OperationKind::Read);
        assert_eq!(DocOperation::Count.operation_kind(), OperationKind::Read);
        assert_eq!(DocOperation::InsertOne.operation_kind(), OperationKind::Insert);
        assert_eq!(DocOperation::DeleteMany.operation_kind(), OperationKind::Delete);
    }

    #[test]
    fn kv_command_kind_partitioning() {
        assert_eq!(KvCommandName::Get.operation_kind(), OperationKind::Read);
        assert_eq!(KvCommandName::Scan.operation_kind(), OperationKind::Read);
        assert_eq!(KvCommandName::Set.operation_kind(), OperationKind::Update);
        assert_eq!(KvCommandName::Del.operation_kind(), OperationKind::Delete);
    }

    #[test]
    fn query_result_empty_and_write() {
        let empty = QueryResult::empty(5);
        assert!(empty.is_empty());
        let write = QueryResult::write_result(3, Some(7), 5);
        assert!(!write.is_empty());
        assert_eq!(write.rows_affected, Some(3));
    }
}
