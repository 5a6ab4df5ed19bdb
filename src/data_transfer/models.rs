use crate::config::RunMode;
use crate::data_transfer::coercer::ColumnCoercionStats;
use crate::db_types::SourceEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a load run. Each state is entered at most once and in order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Reflecting,
    SyncingSchema,
    Streaming,
    Reconciling,
    Succeeded,
    Partial,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_phase(&self) -> RunPhase {
        match self {
            RunStatus::Succeeded => RunPhase::Succeeded,
            RunStatus::Partial => RunPhase::Partial,
            RunStatus::Failed => RunPhase::Failed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
            RunStatus::Partial => 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    #[default]
    Success,
    Partial,
    Failed,
    /// Table was reflected but not loaded (validate-only or dry-run).
    Skipped,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    AlreadyExists,
    Altered,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSyncReport {
    pub outcome: SyncOutcome,
    #[serde(default)]
    pub added_columns: Vec<String>,
    /// Source columns the destination lacks and that were left out of inserts.
    #[serde(default)]
    pub skipped_columns: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Statements that were (or in dry-run, would be) executed.
    #[serde(default)]
    pub statements: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub source_name: String,
    pub source_table: String,
    pub destination_table: String,
    pub status: TableStatus,
    pub rows_attempted: u64,
    pub rows_inserted: u64,
    /// Rows dropped by in-chunk primary-key deduplication.
    pub rows_skipped: u64,
    pub chunks: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaSyncReport>,
    #[serde(default)]
    pub coercion: Vec<ColumnCoercionStats>,
    pub duration_ms: u64,
}

impl TransferResult {
    pub fn new(source_name: &str, source_table: &str, destination_table: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_table: source_table.to_string(),
            destination_table: destination_table.to_string(),
            ..Self::default()
        }
    }

    /// Marks the table failed; rows already inserted downgrade it to partial.
    pub fn record_failure(&mut self, message: String) {
        self.status = if self.rows_inserted > 0 {
            TableStatus::Partial
        } else {
            TableStatus::Failed
        };
        self.errors.push(message);
    }

    pub fn reached_streaming(&self) -> bool {
        self.schema.is_some()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Match,
    Mismatch,
    SourceUnreadable,
    DestinationUnreadable,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub source_name: String,
    pub source_table: String,
    pub destination_table: String,
    pub source_count: Option<u64>,
    pub destination_count: Option<u64>,
    /// Destination minus source; absent when either side was unreadable.
    pub delta: Option<i64>,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub audited_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_counts(
        source_name: &str,
        source_table: &str,
        destination_table: &str,
        source_count: Result<u64, String>,
        destination_count: Result<u64, String>,
    ) -> Self {
        let (status, error) = match (&source_count, &destination_count) {
            (Err(e), _) => (AuditStatus::SourceUnreadable, Some(e.clone())),
            (_, Err(e)) => (AuditStatus::DestinationUnreadable, Some(e.clone())),
            (Ok(src), Ok(dest)) if src == dest => (AuditStatus::Match, None),
            (Ok(_), Ok(_)) => (AuditStatus::Mismatch, None),
        };
        let source_count = source_count.ok();
        let destination_count = destination_count.ok();
        let delta = match (source_count, destination_count) {
            (Some(src), Some(dest)) => Some(dest as i64 - src as i64),
            _ => None,
        };

        Self {
            source_name: source_name.to_string(),
            source_table: source_table.to_string(),
            destination_table: destination_table.to_string(),
            source_count,
            destination_count,
            delta,
            status,
            error,
            audited_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub name: String,
    pub engine: SourceEngine,
    pub database: String,
    pub tables_reflected: usize,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub phases: Vec<RunPhase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceReport>,
    pub tables: Vec<TransferResult>,
    pub audits: Vec<AuditRecord>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn total_rows_inserted(&self) -> u64 {
        self.tables.iter().map(|table| table.rows_inserted).sum()
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn audit_discrepancies(&self) -> usize {
        self.audits
            .iter()
            .filter(|audit| audit.status != AuditStatus::Match)
            .count()
    }
}

/// Derives the run outcome from per-source and per-table results.
///
/// A run with no failure anywhere succeeded, a run where nothing could be
/// loaded failed, anything in between is partial. Skipped tables count as
/// neither.
pub fn aggregate_run_status(sources: &[SourceReport], tables: &[TransferResult]) -> RunStatus {
    let failed_sources = sources.iter().filter(|source| source.failed).count();
    if !sources.is_empty() && failed_sources == sources.len() {
        return RunStatus::Failed;
    }

    let loaded = tables
        .iter()
        .filter(|table| table.status != TableStatus::Skipped)
        .collect::<Vec<_>>();
    let succeeded = loaded
        .iter()
        .filter(|table| table.status == TableStatus::Success)
        .count();
    let all_failed = loaded
        .iter()
        .all(|table| table.status == TableStatus::Failed);

    if !loaded.is_empty() && all_failed {
        return RunStatus::Failed;
    }
    if failed_sources == 0 && succeeded == loaded.len() {
        return RunStatus::Succeeded;
    }
    RunStatus::Partial
}
