//! Audit log (C9): an append-only JSONL record of every non-read
//! operation, grounded in `multi_db/permission/audit.py` (record shape,
//! filters, default path) and `dbflux`'s `dirs`-based storage convention
//! (`Config::audit_log_path`).

use crate::error::{DbError, DbResult};
use crate::models::OperationKind;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Success,
    Failed,
}

/// One JSONL line (spec.md §4.9: "audit log"). `operation` is always a
/// write kind; READ operations are never audited.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AuditRecord {
    pub timestamp: String,
    pub connection: String,
    pub resource: String,
    pub operation: OperationKind,
    pub user: Option<String>,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filters for `get_logs` (spec.md §4.9, the `dbutils-get-audit-logs`
/// tool's parameters).
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub connection: Option<String>,
    pub resource: Option<String>,
    pub operation: Option<OperationKind>,
    pub status: Option<AuditStatus>,
}

impl AuditFilter {
    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(c) = &self.connection {
            if &record.connection != c {
                return false;
            }
        }
        if let Some(r) = &self.resource {
            if &record.resource != r {
                return false;
            }
        }
        if let Some(op) = self.operation {
            if record.operation != op {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}

/// Append-only JSONL audit writer, serialised behind a mutex so
/// concurrent handler calls never interleave partial lines.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Append a successful write operation. READ operations are not
    /// audited (spec.md §4.9: "only INSERT/UPDATE/DELETE are recorded").
    pub async fn log_operation(
        &self,
        connection: &str,
        resource: &str,
        operation: OperationKind,
        user: Option<&str>,
        affected_rows: Option<u64>,
        last_insert_id: Option<i64>,
    ) -> DbResult<()> {
        if operation == OperationKind::Read {
            return Ok(());
        }
        let record = AuditRecord {
            timestamp: now_rfc3339(),
            connection: connection.to_string(),
            resource: resource.to_string(),
            operation,
            user: user.map(str::to_string),
            status: AuditStatus::Success,
            affected_rows,
            last_insert_id,
            error: None,
        };
        self.append(&record).await
    }

    /// Append a failed write operation attempt.
    pub async fn log_failed_operation(
        &self,
        connection: &str,
        resource: &str,
        operation: OperationKind,
        user: Option<&str>,
        error: &DbError,
    ) -> DbResult<()> {
        if operation == OperationKind::Read {
            return Ok(());
        }
        let record = AuditRecord {
            timestamp: now_rfc3339(),
            connection: connection.to_string(),
            resource: resource.to_string(),
            operation,
            user: user.map(str::to_string),
            status: AuditStatus::Failed,
            affected_rows: None,
            last_insert_id: None,
            error: Some(error.to_string()),
        };
        self.append(&record).await
    }

    async fn append(&self, record: &AuditRecord) -> DbResult<()> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let line = serde_json::to_string(record)
            .map_err(|e| DbError::configuration(format!("failed to serialize audit record: {e}")))?;
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| DbError::configuration(format!("audit append task panicked: {e}")))?
    }

    /// Stream matching records, most recent first, bounded by `limit`.
    pub async fn get_logs(&self, filter: &AuditFilter, limit: usize) -> DbResult<Vec<AuditRecord>> {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || read_matching(&path, &filter, limit))
            .await
            .map_err(|e| DbError::configuration(format!("audit read task panicked: {e}")))?
    }

    /// Truncates the log file. Test-only fixture helper; never exposed as
    /// a tool (auditing is append-only from the broker's perspective).
    #[cfg(test)]
    pub(crate) async fn clear_logs(&self) -> DbResult<()> {
        let _guard = self.lock.lock().await;
        std::fs::write(&self.path, b"").map_err(|e| {
            DbError::configuration(format!("failed to clear audit log {}: {e}", self.path.display()))
        })
    }
}

fn append_line(path: &Path, line: &str) -> DbResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::configuration(format!("cannot create audit log directory: {e}")))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DbError::configuration(format!("cannot open audit log {}: {e}", path.display())))?;
    writeln!(file, "{line}")
        .map_err(|e| DbError::configuration(format!("cannot write audit log {}: {e}", path.display())))
}

fn read_matching(path: &Path, filter: &AuditFilter, limit: usize) -> DbResult<Vec<AuditRecord>> {
    let Ok(file) = std::fs::File::open(path) else {
        return Ok(Vec::new());
    };
    let reader = std::io::BufReader::new(file);
    let mut matched = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| DbError::configuration(format!("cannot read audit log: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if filter.matches(&record) {
            matched.push(record);
        }
    }
    matched.reverse();
    matched.truncate(limit);
    Ok(matched)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn log_at(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("audit.log"))
    }

    #[tokio::test]
    async fn read_only_operations_are_never_recorded() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir);
        log.log_operation("c1", "users", OperationKind::Read, None, None, None)
            .await
            .unwrap();
        let records = log.get_logs(&AuditFilter::default(), 100).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn write_operations_are_recorded_and_retrievable_newest_first() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir);
        log.log_operation("c1", "users", OperationKind::Insert, Some("alice"), Some(1), Some(7))
            .await
            .unwrap();
        log.log_operation("c1", "orders", OperationKind::Update, Some("alice"), Some(2), None)
            .await
            .unwrap();

        let records = log.get_logs(&AuditFilter::default(), 100).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].resource, "orders");
        assert_eq!(records[1].resource, "users");
    }

    #[tokio::test]
    async fn failed_operation_records_error_and_failed_status() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir);
        let err = DbError::permission("c1", "users", "DELETE", "no matching rule");
        log.log_failed_operation("c1", "users", OperationKind::Delete, None, &err)
            .await
            .unwrap();

        let records = log.get_logs(&AuditFilter::default(), 100).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Failed);
        assert!(records[0].error.as_ref().unwrap().contains("Permission denied"));
    }

    #[tokio::test]
    async fn filter_by_connection_and_operation() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir);
        log.log_operation("c1", "users", OperationKind::Insert, None, Some(1), None)
            .await
            .unwrap();
        log.log_operation("c2", "users", OperationKind::Insert, None, Some(1), None)
            .await
            .unwrap();
        log.log_operation("c1", "users", OperationKind::Delete, None, Some(1), None)
            .await
            .unwrap();

        let filter = AuditFilter {
            connection: Some("c1".to_string()),
            operation: Some(OperationKind::Insert),
            ..Default::default()
        };
        let records = log.get_logs(&filter, 100).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].connection, "c1");
    }

    #[tokio::test]
    async fn limit_bounds_returned_record_count() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir);
        for i in 0..5 {
            log.log_operation("c1", &format!("t{i}"), OperationKind::Insert, None, Some(1), None)
                .await
                .unwrap();
        }
        let records = log.get_logs(&AuditFilter::default(), 2).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn missing_log_file_returns_empty_list() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("nonexistent").join("audit.log"));
        let records = log.get_logs(&AuditFilter::default(), 10).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn clear_logs_truncates_the_file() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir);
        log.log_operation("c1", "users", OperationKind::Insert, None, Some(1), None)
            .await
            .unwrap();
        log.clear_logs().await.unwrap();
        let records = log.get_logs(&AuditFilter::default(), 100).await.unwrap();
        assert!(records.is_empty());
    }
}
