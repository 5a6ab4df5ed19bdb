// =====================================================
// LOADER ERROR TAXONOMY
// =====================================================

use serde::Serialize;
use thiserror::Error;

/// How far an error is allowed to propagate before it is captured.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    Run,
    Source,
    Table,
    Retryable,
}

#[derive(Error, Debug)]
pub enum LoadError {
    /// Malformed or inconsistent run configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No valid source connection descriptors were supplied")]
    NoSources,

    /// Connection, authentication or catalog failure on one source.
    #[error("Source '{source_name}' is unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("Source '{source_name}' has no tables in database '{database}'")]
    EmptySchema { source_name: String, database: String },

    #[error("Destination is unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Schema sync failed for table {table}: {message}")]
    SchemaSync { table: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Network hiccup that is worth another attempt.
    #[error("Transient failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("{operation} failed: {message}")]
    Query { operation: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn schema_sync(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::SchemaSync {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        LoadError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Lifts a driver message into either a transient or a plain query error.
    pub fn from_driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let operation = operation.into();
        let message = message.into();
        if is_transient_message(&message) {
            LoadError::Transient { operation, message }
        } else {
            LoadError::Query { operation, message }
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            LoadError::Config(_) | LoadError::NoSources | LoadError::Json(_) | LoadError::Io(_) => {
                ErrorScope::Run
            }
            LoadError::SourceUnavailable { .. } | LoadError::EmptySchema { .. } => {
                ErrorScope::Source
            }
            LoadError::Timeout { .. } | LoadError::Transient { .. } => ErrorScope::Retryable,
            LoadError::DestinationUnavailable(_)
            | LoadError::SchemaSync { .. }
            | LoadError::Query { .. } => ErrorScope::Table,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.scope() == ErrorScope::Retryable
    }
}

/// Driver messages that indicate a dropped or slow link rather than a bad query.
pub fn is_transient_message(message: &str) -> bool {
    let normalized = message.to_ascii_lowercase();
    [
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "broken pipe",
        "os error 104",
        "os error 111",
        "pool timed out",
        "connection closed",
        "unexpected eof",
        "temporarily unavailable",
        "too many connections",
    ]
    .iter()
    .any(|needle| normalized.contains(needle))
}

pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests;
