use crate::clickhouse::{build_add_columns_sql, build_create_table_sql};
use crate::config::LoadOptions;
use crate::data_transfer::mapper::MappedColumn;
use crate::data_transfer::models::{SchemaSyncReport, SyncOutcome};
use crate::data_transfer::retry::with_timeout;
use crate::data_transfer::sink::{DestinationColumn, DestinationSink};
use crate::error::{LoadError, Result};

fn normalize_type(type_name: &str) -> String {
    type_name.chars().filter(|ch| !ch.is_whitespace()).collect()
}

/// Differences between the mapped schema and an existing destination table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub missing: Vec<MappedColumn>,
    pub type_mismatches: Vec<(String, String, String)>,
    pub extra: Vec<String>,
}

impl SchemaDiff {
    pub fn warnings(&self, table: &str) -> Vec<String> {
        let mut warnings = self
            .type_mismatches
            .iter()
            .map(|(column, existing, mapped)| {
                format!(
                    "{}.{} is {} in the destination but maps to {}",
                    table, column, existing, mapped
                )
            })
            .collect::<Vec<_>>();
        warnings.extend(self.extra.iter().map(|column| {
            format!(
                "{}.{} exists only in the destination and will be filled with defaults",
                table, column
            )
        }));
        warnings
    }
}

pub fn diff_schema(existing: &[DestinationColumn], mapped: &[MappedColumn]) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for column in mapped {
        match existing.iter().find(|c| c.name == column.name()) {
            None => diff.missing.push(column.clone()),
            Some(current) => {
                let expected = column.clickhouse_type();
                if normalize_type(&current.type_name) != normalize_type(&expected) {
                    diff.type_mismatches.push((
                        column.name().to_string(),
                        current.type_name.clone(),
                        expected,
                    ));
                }
            }
        }
    }

    diff.extra = existing
        .iter()
        .filter(|c| !mapped.iter().any(|m| m.name() == c.name))
        .map(|c| c.name.clone())
        .collect();

    diff
}

fn destination_error(table: &str, err: LoadError) -> LoadError {
    if err.is_retryable() {
        LoadError::DestinationUnavailable(format!("{}: {}", table, err))
    } else {
        LoadError::schema_sync(table, err.to_string())
    }
}

/// Makes sure `table` exists with at least the mapped columns.
///
/// Existing data is never dropped or rewritten. Divergent types and
/// destination-only columns come back as warnings; source columns the
/// destination lacks are added when `addMissingColumns` is on and reported
/// as skipped otherwise.
pub async fn synchronize(
    destination: &dyn DestinationSink,
    table: &str,
    columns: &[MappedColumn],
    primary_key: &[String],
    options: &LoadOptions,
) -> Result<SchemaSyncReport> {
    reconcile(destination, table, columns, primary_key, options, true).await
}

/// Same decisions as [`synchronize`], but only reads the destination. The
/// report lists the statements a real run would execute.
pub async fn preview(
    destination: &dyn DestinationSink,
    table: &str,
    columns: &[MappedColumn],
    primary_key: &[String],
    options: &LoadOptions,
) -> Result<SchemaSyncReport> {
    reconcile(destination, table, columns, primary_key, options, false).await
}

async fn reconcile(
    destination: &dyn DestinationSink,
    table: &str,
    columns: &[MappedColumn],
    primary_key: &[String],
    options: &LoadOptions,
    apply: bool,
) -> Result<SchemaSyncReport> {
    let timeout = options.timeouts.insert();
    let existing = options
        .retry
        .run("inspect destination table", || {
            with_timeout("inspect destination table", timeout, destination.table_columns(table))
        })
        .await
        .map_err(|err| destination_error(table, err))?;

    let Some(existing) = existing else {
        let statement = build_create_table_sql(destination.database(), table, columns, primary_key);
        if apply {
            options
                .retry
                .run("create destination table", || {
                    with_timeout(
                        "create destination table",
                        timeout,
                        destination.create_table(table, columns, primary_key),
                    )
                })
                .await
                .map_err(|err| destination_error(table, err))?;
            log::info!("Created destination table {}", table);
        }
        return Ok(SchemaSyncReport {
            outcome: SyncOutcome::Created,
            added_columns: Vec::new(),
            skipped_columns: Vec::new(),
            warnings: Vec::new(),
            statements: vec![statement],
        });
    };

    let diff = diff_schema(&existing, columns);
    let mut warnings = diff.warnings(table);
    for warning in &warnings {
        log::warn!("{}", warning);
    }

    if diff.missing.is_empty() {
        return Ok(SchemaSyncReport {
            outcome: SyncOutcome::AlreadyExists,
            added_columns: Vec::new(),
            skipped_columns: Vec::new(),
            warnings,
            statements: Vec::new(),
        });
    }

    let missing_names = diff
        .missing
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>();

    if !options.add_missing_columns {
        warnings.push(format!(
            "{} lacks column(s) {}; their values are not loaded",
            table,
            missing_names.join(", ")
        ));
        return Ok(SchemaSyncReport {
            outcome: SyncOutcome::AlreadyExists,
            added_columns: Vec::new(),
            skipped_columns: missing_names,
            warnings,
            statements: Vec::new(),
        });
    }

    let statement = build_add_columns_sql(destination.database(), table, &diff.missing);
    if apply {
        options
            .retry
            .run("add destination columns", || {
                with_timeout(
                    "add destination columns",
                    timeout,
                    destination.add_columns(table, &diff.missing),
                )
            })
            .await
            .map_err(|err| destination_error(table, err))?;
        log::info!("Added column(s) {} to {}", missing_names.join(", "), table);
    }

    Ok(SchemaSyncReport {
        outcome: SyncOutcome::Altered,
        added_columns: missing_names,
        skipped_columns: Vec::new(),
        warnings,
        statements: vec![statement],
    })
}
