use bulkhouse_lib::{LoadError, LoadOptions, RunConfig, RunMode, RunReport};
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const EXIT_CONFIG_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON run configuration (sources, destination, options).
    #[arg(long, short)]
    config: PathBuf,

    /// Only load these tables (`table`, `schema.table` or `source.table`).
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Never load these tables.
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    #[arg(long)]
    chunk_size: Option<usize>,

    /// Empty each destination table before loading it.
    #[arg(long)]
    truncate: bool,

    /// Check connectivity and reflect schemas, then exit.
    #[arg(long, conflicts_with_all = ["audit_only", "dry_run"])]
    validate_only: bool,

    /// Skip streaming and only compare row counts.
    #[arg(long, conflicts_with = "dry_run")]
    audit_only: bool,

    /// Print the DDL that would run without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Also write the JSON report to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn apply(&self, options: &mut LoadOptions) {
        if !self.include.is_empty() {
            options.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            options.exclude.extend(self.exclude.iter().cloned());
        }
        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        if self.truncate {
            options.truncate_before_load = true;
        }
        if self.validate_only {
            options.mode = RunMode::ValidateOnly;
        } else if self.audit_only {
            options.mode = RunMode::AuditOnly;
        } else if self.dry_run {
            options.mode = RunMode::DryRun;
        }
    }
}

async fn load_config(args: &Args) -> bulkhouse_lib::Result<RunConfig> {
    let raw = tokio::fs::read_to_string(&args.config).await.map_err(|e| {
        LoadError::Config(format!("Cannot read {}: {}", args.config.display(), e))
    })?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| LoadError::Config(format!("{} is not valid JSON: {}", args.config.display(), e)))?;

    let mut config = RunConfig::from_value(value)?;
    args.apply(&mut config.options);
    config.validate()?;
    Ok(config)
}

async fn write_report(report: &RunReport, path: &Path) -> bulkhouse_lib::Result<String> {
    let rendered = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, &rendered).await?;
    Ok(rendered)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();

    let config = match load_config(&args).await {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let report = match bulkhouse_lib::run(&config).await {
        Ok(report) => report,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let rendered = match &args.report {
        Some(path) => match write_report(&report, path).await {
            Ok(rendered) => {
                log::info!("Report written to {}", path.display());
                rendered
            }
            Err(err) => {
                log::error!("Failed to write report to {}: {}", path.display(), err);
                serde_json::to_string_pretty(&report).unwrap_or_default()
            }
        },
        None => serde_json::to_string_pretty(&report).unwrap_or_default(),
    };
    println!("{}", rendered);

    ExitCode::from(report.exit_code() as u8)
}
