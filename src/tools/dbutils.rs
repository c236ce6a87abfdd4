//! Input/output shapes for the ten `dbutils-*` MCP tools (spec.md §6),
//! one struct pair per tool in the teacher's `tools/query.rs` convention:
//! a `Deserialize + JsonSchema` input and a `Serialize + JsonSchema`
//! output, the latter reusing the `Handler`/adapter domain types
//! directly rather than duplicating every field.

use crate::db::adapter::{ConstraintDescription, IndexDescription, ResourceDescription, ResourceStats, ResourceSummary};
use crate::db::audit::{AuditRecord, AuditStatus};
use crate::models::{ColumnMetadata, OperationKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunQueryInput {
    /// Name of a configured connection.
    pub connection: String,
    /// Literal SQL text for SQL-family connections; a JSON-encoded
    /// `DocumentQuery` for MongoDB; a JSON-encoded `KvCommand` for Redis.
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RunQueryOutput {
    pub backend: String,
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    pub connection: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub backend: String,
    pub resources: Vec<ResourceSummary>,
    pub count: usize,
    /// Human-readable listing prefixed `[<backend>]` (spec.md §6).
    pub formatted: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    pub connection: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub backend: String,
    pub description: ResourceDescription,
    /// Human-readable structure dump (spec.md §6).
    pub formatted: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetDdlInput {
    pub connection: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetDdlOutput {
    pub backend: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListIndexesInput {
    pub connection: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListIndexesOutput {
    pub backend: String,
    pub table: String,
    pub indexes: Vec<IndexDescription>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetStatsInput {
    pub connection: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetStatsOutput {
    pub backend: String,
    pub stats: ResourceStats,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListConstraintsInput {
    pub connection: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListConstraintsOutput {
    pub backend: String,
    pub table: String,
    pub constraints: Vec<ConstraintDescription>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExplainQueryInput {
    pub connection: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExplainQueryOutput {
    pub backend: String,
    pub columns: Vec<ColumnMetadata>,
    pub plan: Vec<serde_json::Map<String, JsonValue>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteWriteInput {
    pub connection: String,
    pub sql: String,
    /// Must equal the literal token `CONFIRM_WRITE` (spec.md §6).
    pub confirmation: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExecuteWriteOutput {
    pub backend: String,
    /// Contains the literal substring `"<n> row(s) affected"`.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetAuditLogsInput {
    pub connection: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub operation_type: Option<OperationKind>,
    #[serde(default)]
    pub status: Option<AuditStatus>,
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetAuditLogsOutput {
    pub records: Vec<AuditRecord>,
    pub count: usize,
}

/// Formats the row-affected message `dbutils-execute-write` requires to
/// contain verbatim (spec.md §8 scenario 4: "success message containing
/// '1 row affected'").
pub fn affected_rows_message(rows_affected: u64) -> String {
    let noun = if rows_affected == 1 { "row" } else { "rows" };
    format!("{rows_affected} {noun} affected")
}

/// Human-readable `[<backend>] name (type)` listing (spec.md §6
/// `dbutils-list-tables`: "prefixed `[<backend>]`").
pub fn format_resource_list(backend: &str, resources: &[ResourceSummary]) -> String {
    if resources.is_empty() {
        return format!("[{backend}] (no resources)");
    }
    let mut out = String::new();
    for resource in resources {
        out.push_str(&format!("[{backend}] {} ({})", resource.name, resource.resource_type));
        if let Some(rows) = resource.row_count {
            out.push_str(&format!(", {rows} rows"));
        }
        out.push('\n');
    }
    out.pop();
    out
}

/// Human-readable column-by-column structure dump (spec.md §6
/// `dbutils-describe-table`: "Human-readable structure dump").
pub fn format_description(backend: &str, description: &ResourceDescription) -> String {
    let mut out = format!("[{backend}] {}\n", description.name);
    for field in &description.fields {
        let nullable = if field.nullable { "NULL" } else { "NOT NULL" };
        let pk = if field.is_primary_key { ", PRIMARY KEY" } else { "" };
        out.push_str(&format!("  {} {} {nullable}{pk}\n", field.name, field.type_name));
    }
    if !description.indexes.is_empty() {
        out.push_str("indexes:\n");
        for index in &description.indexes {
            let unique = if index.is_unique { "UNIQUE " } else { "" };
            out.push_str(&format!("  {unique}{} ({})\n", index.name, index.columns.join(", ")));
        }
    }
    if !description.constraints.is_empty() {
        out.push_str("constraints:\n");
        for constraint in &description.constraints {
            out.push_str(&format!("  {} {}: {}\n", constraint.kind, constraint.name, constraint.detail));
        }
    }
    out.pop();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affected_rows_message_singular_and_plural() {
        assert_eq!(affected_rows_message(1), "1 row affected");
        assert_eq!(affected_rows_message(0), "0 rows affected");
        assert_eq!(affected_rows_message(5), "5 rows affected");
    }

    #[test]
    fn format_resource_list_prefixes_backend() {
        let resources = vec![ResourceSummary {
            name: "widgets".to_string(),
            resource_type: "table".to_string(),
            row_count: Some(2),
            size_bytes: None,
        }];
        let formatted = format_resource_list("sqlite", &resources);
        assert!(formatted.starts_with("[sqlite] widgets (table)"));
    }
}
