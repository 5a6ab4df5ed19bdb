// Database modules
pub mod clickhouse;
pub mod db_types;
pub mod mysql;
pub mod postgres;

pub mod config;
pub mod data_transfer;
pub mod error;

pub use config::{LoadOptions, RunConfig, RunMode};
pub use data_transfer::models::{RunReport, RunStatus};
pub use error::{LoadError, Result};

use data_transfer::connection_resolver::{resolve_destination, resolve_sources};

/// Connects every configured source, runs the load and returns its report.
///
/// Only a destination that cannot even be configured is an error here; every
/// failure after that is captured in the report.
pub async fn run(config: &RunConfig) -> Result<RunReport> {
    let destination = resolve_destination(config)?;
    let sources = resolve_sources(config).await;
    Ok(data_transfer::runner::execute(sources, &destination, &config.options).await)
}
