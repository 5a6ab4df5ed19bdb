use crate::data_transfer::models::{AuditRecord, AuditStatus};
use crate::data_transfer::planner::TablePlan;
use crate::data_transfer::retry::with_timeout;
use crate::data_transfer::sink::{DestinationSink, SourceReader};
use std::time::Duration;

/// Compares source and destination row counts for one table.
///
/// Either side failing to answer is recorded on the returned record rather
/// than raised, so one unreadable table never stops the reconciliation pass.
pub async fn audit_table(
    source: &dyn SourceReader,
    destination: &dyn DestinationSink,
    plan: &TablePlan,
    timeout: Duration,
) -> AuditRecord {
    let table = &plan.table;

    let source_count = with_timeout(
        "count source rows",
        timeout,
        source.count_rows(&table.schema, &table.table),
    )
    .await
    .map_err(|e| e.to_string());

    let destination_count = with_timeout(
        "count destination rows",
        timeout,
        destination.count_rows(&plan.destination_table),
    )
    .await
    .map_err(|e| e.to_string());

    let record = AuditRecord::from_counts(
        &table.source_name,
        &table.table,
        &plan.destination_table,
        source_count,
        destination_count,
    );

    match record.status {
        AuditStatus::Match => log::info!(
            "Audit {}: {} row(s) on both sides",
            table.display_name(),
            record.source_count.unwrap_or_default()
        ),
        AuditStatus::Mismatch => log::warn!(
            "Audit {}: source {} vs destination {} (delta {})",
            table.display_name(),
            record.source_count.unwrap_or_default(),
            record.destination_count.unwrap_or_default(),
            record.delta.unwrap_or_default()
        ),
        AuditStatus::SourceUnreadable | AuditStatus::DestinationUnreadable => log::warn!(
            "Audit {} incomplete ({:?}): {}",
            table.display_name(),
            record.status,
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }

    record
}
