//! MCP tool input/output shapes.
//!
//! - `dbutils`: request/response structs for the ten `dbutils-*` tools
//!   (spec.md §6), bound to `Handler` by `mcp/service.rs`.

pub mod dbutils;

pub use dbutils::{
    DescribeTableInput as DbutilsDescribeTableInput, DescribeTableOutput as DbutilsDescribeTableOutput,
    ExecuteWriteInput, ExecuteWriteOutput, ExplainQueryInput, ExplainQueryOutput, GetAuditLogsInput,
    GetAuditLogsOutput, GetDdlInput, GetDdlOutput, GetStatsInput, GetStatsOutput, ListConstraintsInput,
    ListConstraintsOutput, ListIndexesInput, ListIndexesOutput,
    ListTablesInput as DbutilsListTablesInput, ListTablesOutput as DbutilsListTablesOutput, RunQueryInput,
    RunQueryOutput,
};
