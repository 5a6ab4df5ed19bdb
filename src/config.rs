// =====================================================
// RUN CONFIGURATION
// =====================================================

use crate::data_transfer::planner::destination_prefix;
use crate::data_transfer::retry::RetryPolicy;
use crate::db_types::SourceEngine;
use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_CHUNK_SIZE: usize = 10_000;
const MAX_TABLE_CONCURRENCY: usize = 8;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_table_concurrency() -> usize {
    2
}

fn default_source_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_clickhouse_port() -> u16 {
    8123
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

// --- Connection Specs ---

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SourceConnectionSpec {
    /// Logical name; identity of the source for the whole run.
    pub name: String,
    pub engine: SourceEngine,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    /// Postgres namespace holding the tables. Ignored for MySQL.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub ssl_mode: Option<String>,
}

impl SourceConnectionSpec {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    /// Namespace that qualifies reflected tables.
    pub fn table_schema(&self) -> String {
        match self.engine {
            SourceEngine::Postgres => self
                .schema
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("public")
                .to_string(),
            _ => self.database.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSpec {
    pub host: String,
    #[serde(default = "default_clickhouse_port")]
    pub port: u16,
    #[serde(default = "default_clickhouse_user")]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    #[serde(default)]
    pub secure: bool,
}

impl DestinationSpec {
    pub fn url(&self) -> String {
        let host = self.host.trim();
        if host.starts_with("http://") || host.starts_with("https://") {
            return format!("{}:{}", host.trim_end_matches('/'), self.port);
        }
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, host, self.port)
    }
}

// --- Load Options ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Transfer,
    ValidateOnly,
    AuditOnly,
    DryRun,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSettings {
    pub connect_secs: u64,
    pub reflect_secs: u64,
    pub fetch_secs: u64,
    pub insert_secs: u64,
    pub audit_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            reflect_secs: 60,
            fetch_secs: 120,
            insert_secs: 120,
            audit_secs: 60,
        }
    }
}

impl TimeoutSettings {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn reflect(&self) -> Duration {
        Duration::from_secs(self.reflect_secs)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn insert(&self) -> Duration {
        Duration::from_secs(self.insert_secs)
    }

    pub fn audit(&self) -> Duration {
        Duration::from_secs(self.audit_secs)
    }
}

/// Thresholds for the temporal repair heuristics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoercionSettings {
    pub min_year: i32,
    pub max_year: i32,
    /// Share of non-null values that may fail the validity test before a
    /// name-matched column is left alone.
    pub invalid_threshold: f64,
}

impl Default for CoercionSettings {
    fn default() -> Self {
        Self {
            min_year: 1970,
            max_year: 2099,
            invalid_threshold: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoadOptions {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub truncate_before_load: bool,
    #[serde(default = "default_table_concurrency")]
    pub table_concurrency: usize,
    #[serde(default = "default_source_concurrency")]
    pub source_concurrency: usize,
    #[serde(default = "default_true")]
    pub add_missing_columns: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub coercion: CoercionSettings,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            include: Vec::new(),
            exclude: Vec::new(),
            truncate_before_load: false,
            table_concurrency: default_table_concurrency(),
            source_concurrency: default_source_concurrency(),
            add_missing_columns: true,
            retry: RetryPolicy::default(),
            timeouts: TimeoutSettings::default(),
            coercion: CoercionSettings::default(),
        }
    }
}

impl LoadOptions {
    pub fn effective_table_concurrency(&self) -> usize {
        self.table_concurrency.clamp(1, MAX_TABLE_CONCURRENCY)
    }

    pub fn effective_source_concurrency(&self) -> usize {
        self.source_concurrency.max(1)
    }
}

// --- Run Config ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub sources: Vec<SourceConnectionSpec>,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub options: LoadOptions,
}

impl RunConfig {
    /// Builds a config from an already-parsed JSON document and validates it.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: RunConfig = serde_json::from_value(value)
            .map_err(|e| LoadError::Config(format!("Malformed run configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Two sources may not write into the same destination tables. Names are
    /// sanitized before they reach ClickHouse, so `crm-1` and `crm_1` clash,
    /// and a prefix that extends another (`a__b`/`c` after `a`/`b`) can too.
    fn check_destination_prefixes(&self) -> Result<()> {
        let prefixes = self
            .sources
            .iter()
            .map(|source| (source, destination_prefix(source.name.trim(), source.database.trim())))
            .collect::<Vec<_>>();
        for (index, (left, left_prefix)) in prefixes.iter().enumerate() {
            for (right, right_prefix) in prefixes.iter().skip(index + 1) {
                if left_prefix.starts_with(right_prefix.as_str())
                    || right_prefix.starts_with(left_prefix.as_str())
                {
                    return Err(LoadError::Config(format!(
                        "Sources '{}' and '{}' would load into overlapping destination tables ({} / {})",
                        left.name.trim(),
                        right.name.trim(),
                        left_prefix,
                        right_prefix
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(LoadError::NoSources);
        }

        let mut seen = HashSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let name = source.name.trim();
            if name.is_empty() {
                return Err(LoadError::Config(format!(
                    "Source {} has an empty name",
                    index + 1
                )));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(LoadError::Config(format!(
                    "Source name '{}' is used more than once",
                    name
                )));
            }
            if source.host.trim().is_empty() {
                return Err(LoadError::Config(format!("Source '{}' has no host", name)));
            }
            if source.port == Some(0) {
                return Err(LoadError::Config(format!("Source '{}' has port 0", name)));
            }
            if source.database.trim().is_empty() {
                return Err(LoadError::Config(format!(
                    "Source '{}' has no database",
                    name
                )));
            }
        }

        self.check_destination_prefixes()?;

        if self.destination.host.trim().is_empty() {
            return Err(LoadError::Config("Destination host is required".to_string()));
        }
        if self.destination.database.trim().is_empty() {
            return Err(LoadError::Config(
                "Destination database is required".to_string(),
            ));
        }

        let options = &self.options;
        if options.chunk_size == 0 {
            return Err(LoadError::Config("chunkSize must be at least 1".to_string()));
        }
        if options.coercion.min_year > options.coercion.max_year {
            return Err(LoadError::Config(format!(
                "coercion.minYear ({}) is after coercion.maxYear ({})",
                options.coercion.min_year, options.coercion.max_year
            )));
        }
        if !(0.0..=1.0).contains(&options.coercion.invalid_threshold) {
            return Err(LoadError::Config(
                "coercion.invalidThreshold must be between 0 and 1".to_string(),
            ));
        }
        options.retry.validate().map_err(LoadError::Config)?;

        Ok(())
    }
}
