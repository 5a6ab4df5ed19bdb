use crate::clickhouse::ClickHouseDestination;
use crate::config::{LoadOptions, RunConfig, SourceConnectionSpec};
use crate::data_transfer::models::SourceReport;
use crate::data_transfer::runner::{SourceHandle, SourceSlot};
use crate::data_transfer::sink::SourceReader;
use crate::db_types::SourceEngine;
use crate::error::{LoadError, Result};
use crate::mysql::{self, MySqlSource};
use crate::postgres::{self, PostgresSource};
use futures::stream::{self, StreamExt};

/// Connections each source pool may hold: one per concurrent table worker
/// plus one for catalog and audit queries.
pub fn source_pool_size(options: &LoadOptions) -> u32 {
    options.effective_table_concurrency() as u32 + 1
}

pub fn unreachable_report(spec: &SourceConnectionSpec, message: &str) -> SourceReport {
    SourceReport {
        name: spec.name.clone(),
        engine: spec.engine,
        database: spec.database.clone(),
        tables_reflected: 0,
        failed: true,
        error: Some(LoadError::source_unavailable(&spec.name, message).to_string()),
    }
}

async fn open_source(
    spec: &SourceConnectionSpec,
    options: &LoadOptions,
) -> std::result::Result<Box<dyn SourceReader>, String> {
    let timeout = options.timeouts.connect();
    let max_connections = source_pool_size(options);

    match spec.engine {
        SourceEngine::MySQL | SourceEngine::MariaDB => {
            let pool = mysql::create_pool(spec, timeout, max_connections).await?;
            Ok(Box::new(MySqlSource::new(spec, pool)))
        }
        SourceEngine::Postgres => {
            let pool = postgres::create_pool(spec, timeout, max_connections).await?;
            Ok(Box::new(PostgresSource::new(spec, pool)))
        }
    }
}

async fn resolve_source(spec: &SourceConnectionSpec, options: &LoadOptions) -> SourceSlot {
    log::info!(
        "Connecting to source '{}' ({} at {}:{})",
        spec.name,
        spec.engine.as_str(),
        spec.host,
        spec.port()
    );
    match open_source(spec, options).await {
        Ok(reader) => SourceSlot::Connected(SourceHandle {
            reader,
            schema: spec.table_schema(),
        }),
        Err(message) => {
            log::error!("Source '{}' is unreachable: {}", spec.name, message);
            SourceSlot::Unreachable(unreachable_report(spec, &message))
        }
    }
}

/// Opens one pool per configured source. A source that cannot connect comes
/// back as `Unreachable` so the rest of the run proceeds without it.
pub async fn resolve_sources(config: &RunConfig) -> Vec<SourceSlot> {
    stream::iter(config.sources.iter())
        .map(|spec| resolve_source(spec, &config.options))
        .buffered(config.options.effective_source_concurrency())
        .collect()
        .await
}

/// Builds the ClickHouse handle. Only a malformed destination fails here;
/// reachability is checked per table during the run.
pub fn resolve_destination(config: &RunConfig) -> Result<ClickHouseDestination> {
    ClickHouseDestination::new(&config.destination, config.options.timeouts.connect())
        .map_err(LoadError::DestinationUnavailable)
}
