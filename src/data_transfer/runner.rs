use crate::config::{LoadOptions, RunMode};
use crate::data_transfer::audit::audit_table;
use crate::data_transfer::engine::transfer_table;
use crate::data_transfer::models::{
    aggregate_run_status, AuditRecord, RunPhase, RunReport, RunStatus, SourceReport, TableStatus,
    TransferResult,
};
use crate::data_transfer::planner::{partition_colliding_plans, plan_table, TablePlan};
use crate::data_transfer::reflector::{reflect, TableFilter};
use crate::data_transfer::retry::with_timeout;
use crate::data_transfer::schema_sync::preview;
use crate::data_transfer::sink::{DestinationSink, SourceReader};
use crate::error::LoadError;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use uuid::Uuid;

/// A live source plus the namespace its tables are reflected from.
pub struct SourceHandle {
    pub reader: Box<dyn SourceReader>,
    pub schema: String,
}

/// One configured source as handed to the coordinator.
pub enum SourceSlot {
    Connected(SourceHandle),
    /// Connection could not be opened; the report is carried through as-is.
    Unreachable(SourceReport),
}

struct ReflectedSource<'a> {
    report: SourceReport,
    reader: Option<&'a dyn SourceReader>,
    plans: Vec<TablePlan>,
    /// Tables left out because another table already maps to their destination.
    collisions: Vec<TransferResult>,
    warning: Option<String>,
}

struct PhaseLog {
    run_id: String,
    phases: Vec<RunPhase>,
}

impl PhaseLog {
    fn enter(&mut self, phase: RunPhase) {
        log::info!("Run {}: entering {:?}", self.run_id, phase);
        self.phases.push(phase);
    }
}

fn skipped_result(plan: &TablePlan) -> TransferResult {
    TransferResult {
        status: TableStatus::Skipped,
        ..TransferResult::new(
            &plan.table.source_name,
            &plan.table.table,
            &plan.destination_table,
        )
    }
}

async fn reflect_slot<'a>(
    slot: &'a SourceSlot,
    filter: &TableFilter,
    options: &LoadOptions,
) -> ReflectedSource<'a> {
    let handle = match slot {
        SourceSlot::Connected(handle) => handle,
        SourceSlot::Unreachable(report) => {
            return ReflectedSource {
                report: report.clone(),
                reader: None,
                plans: Vec::new(),
                collisions: Vec::new(),
                warning: None,
            }
        }
    };

    let reader = handle.reader.as_ref();
    let mut report = SourceReport {
        name: reader.name().to_string(),
        engine: reader.engine(),
        database: reader.database().to_string(),
        tables_reflected: 0,
        failed: false,
        error: None,
    };

    match reflect(reader, &handle.schema, filter, options.timeouts.reflect()).await {
        Ok(tables) => {
            report.tables_reflected = tables.len();
            let (plans, colliding) =
                partition_colliding_plans(tables.into_iter().map(plan_table).collect());
            let collisions = colliding
                .into_iter()
                .map(|(plan, message)| {
                    log::error!("{}: {}", plan.table.display_name(), message);
                    let mut result = skipped_result(&plan);
                    result.record_failure(message);
                    result
                })
                .collect();
            ReflectedSource {
                report,
                reader: Some(reader),
                plans,
                collisions,
                warning: None,
            }
        }
        Err(err @ LoadError::EmptySchema { .. }) => {
            log::warn!("{}", err);
            ReflectedSource {
                report,
                reader: Some(reader),
                plans: Vec::new(),
                collisions: Vec::new(),
                warning: Some(err.to_string()),
            }
        }
        Err(err) => {
            log::error!("Source '{}' failed during reflection: {}", report.name, err);
            report.failed = true;
            report.error = Some(err.to_string());
            ReflectedSource {
                report,
                reader: None,
                plans: Vec::new(),
                collisions: Vec::new(),
                warning: None,
            }
        }
    }
}

async fn transfer_source(
    source: &dyn SourceReader,
    destination: &dyn DestinationSink,
    plans: &[TablePlan],
    options: &LoadOptions,
) -> Vec<TransferResult> {
    stream::iter(plans)
        .map(|plan| transfer_table(source, destination, plan, options))
        .buffered(options.effective_table_concurrency())
        .collect()
        .await
}

async fn audit_source(
    source: &dyn SourceReader,
    destination: &dyn DestinationSink,
    plans: Vec<&TablePlan>,
    options: &LoadOptions,
) -> Vec<AuditRecord> {
    stream::iter(plans)
        .map(|plan| audit_table(source, destination, plan, options.timeouts.audit()))
        .buffered(options.effective_table_concurrency())
        .collect()
        .await
}

async fn preview_table(
    destination: &dyn DestinationSink,
    plan: &TablePlan,
    options: &LoadOptions,
) -> TransferResult {
    let mut result = skipped_result(plan);
    match preview(
        destination,
        &plan.destination_table,
        &plan.columns,
        plan.order_by(),
        options,
    )
    .await
    {
        Ok(report) => {
            result.warnings.extend(report.warnings.iter().cloned());
            result.schema = Some(report);
        }
        Err(err) => {
            log::error!("Dry run could not inspect {}: {}", plan.destination_table, err);
            result.record_failure(err.to_string());
        }
    }
    result
}

/// Drives one run through reflection, schema sync, streaming and
/// reconciliation, then folds every per-source and per-table outcome into a
/// single report.
///
/// Sources are reflected and loaded concurrently up to `sourceConcurrency`;
/// tables of one source share its pool up to `tableConcurrency`. Nothing
/// below run level can abort the run.
pub async fn execute(
    sources: Vec<SourceSlot>,
    destination: &dyn DestinationSink,
    options: &LoadOptions,
) -> RunReport {
    let clock = Instant::now();
    let started_at = Utc::now();
    let mut tracker = PhaseLog {
        run_id: Uuid::new_v4().to_string(),
        phases: Vec::new(),
    };
    tracker.enter(RunPhase::Init);
    log::info!(
        "Run {} started in {:?} mode with {} source(s)",
        tracker.run_id,
        options.mode,
        sources.len()
    );

    tracker.enter(RunPhase::Reflecting);
    let filter = TableFilter::new(&options.include, &options.exclude);
    let reflected = stream::iter(sources.iter())
        .map(|slot| reflect_slot(slot, &filter, options))
        .buffered(options.effective_source_concurrency())
        .collect::<Vec<_>>()
        .await;

    let mut warnings = reflected
        .iter()
        .filter_map(|source| source.warning.clone())
        .collect::<Vec<_>>();
    let source_reports = reflected
        .iter()
        .map(|source| source.report.clone())
        .collect::<Vec<_>>();
    let all_plans = || reflected.iter().flat_map(|source| source.plans.iter());

    let mut tables = reflected
        .iter()
        .flat_map(|source| source.collisions.iter().cloned())
        .collect::<Vec<_>>();
    let mut audits = Vec::new();
    let mut destination_down = false;

    match options.mode {
        RunMode::ValidateOnly => {
            let pinged =
                with_timeout("ping destination", options.timeouts.connect(), destination.ping())
                    .await;
            if let Err(err) = pinged {
                log::error!("Destination check failed: {}", err);
                warnings.push(LoadError::DestinationUnavailable(err.to_string()).to_string());
                destination_down = true;
            }
            tables.extend(all_plans().map(skipped_result));
        }
        RunMode::DryRun => {
            tracker.enter(RunPhase::SyncingSchema);
            let previews = stream::iter(all_plans())
                .map(|plan| preview_table(destination, plan, options))
                .buffered(options.effective_table_concurrency())
                .collect::<Vec<_>>()
                .await;
            tables.extend(previews);
        }
        RunMode::AuditOnly => {
            tables.extend(all_plans().map(skipped_result));
            tracker.enter(RunPhase::Reconciling);
            let per_source = stream::iter(reflected.iter())
                .filter_map(|source| async move { source.reader.map(|reader| (reader, source)) })
                .map(|(reader, source)| {
                    audit_source(reader, destination, source.plans.iter().collect(), options)
                })
                .buffered(options.effective_source_concurrency())
                .collect::<Vec<_>>()
                .await;
            audits.extend(per_source.into_iter().flatten());
        }
        RunMode::Transfer => {
            tracker.enter(RunPhase::SyncingSchema);
            tracker.enter(RunPhase::Streaming);
            let loaded = stream::iter(reflected.iter())
                .filter_map(|source| async move { source.reader.map(|reader| (reader, source)) })
                .map(|(reader, source)| async move {
                    let results = transfer_source(reader, destination, &source.plans, options).await;
                    (reader, source, results)
                })
                .buffered(options.effective_source_concurrency())
                .collect::<Vec<_>>()
                .await;

            tracker.enter(RunPhase::Reconciling);
            let per_source = stream::iter(loaded.iter())
                .map(|(reader, source, results)| {
                    let streamed = source
                        .plans
                        .iter()
                        .zip(results.iter())
                        .filter(|(_, result)| result.reached_streaming())
                        .map(|(plan, _)| plan)
                        .collect::<Vec<_>>();
                    audit_source(*reader, destination, streamed, options)
                })
                .buffered(options.effective_source_concurrency())
                .collect::<Vec<_>>()
                .await;
            audits.extend(per_source.into_iter().flatten());
            tables.extend(loaded.into_iter().flat_map(|(_, _, results)| results));
        }
    }

    let mut status = aggregate_run_status(&source_reports, &tables);
    if destination_down {
        status = RunStatus::Failed;
    }
    if options.mode == RunMode::AuditOnly
        && status == RunStatus::Succeeded
        && audits.iter().any(|audit| audit.delta != Some(0))
    {
        status = RunStatus::Partial;
    }
    tracker.enter(status.as_phase());

    let report = RunReport {
        run_id: tracker.run_id,
        mode: options.mode,
        status,
        phases: tracker.phases,
        started_at,
        finished_at: Utc::now(),
        duration_ms: clock.elapsed().as_millis() as u64,
        sources: source_reports,
        tables,
        audits,
        warnings,
    };

    log::info!(
        "Run {} finished as {:?}: {} table(s), {} row(s) inserted, {} audit discrepancy(ies)",
        report.run_id,
        report.status,
        report.tables.len(),
        report.total_rows_inserted(),
        report.audit_discrepancies()
    );
    report
}
