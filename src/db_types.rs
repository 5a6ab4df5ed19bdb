// =====================================================
// COMMON DATABASE TYPES AND STRUCTURES
// =====================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Source Engine Enum ---
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceEngine {
    #[serde(alias = "MySQL")]
    MySQL,
    #[serde(alias = "MariaDB")]
    MariaDB,
    #[serde(alias = "postgresql", alias = "PostgreSQL")]
    Postgres,
}

impl SourceEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceEngine::MySQL => "mysql",
            SourceEngine::MariaDB => "mariadb",
            SourceEngine::Postgres => "postgres",
        }
    }

    /// MariaDB speaks the MySQL wire protocol and catalog.
    pub fn is_mysql_family(&self) -> bool {
        matches!(self, SourceEngine::MySQL | SourceEngine::MariaDB)
    }

    pub fn default_port(&self) -> u16 {
        match self {
            SourceEngine::MySQL | SourceEngine::MariaDB => 3306,
            SourceEngine::Postgres => 5432,
        }
    }
}

// --- Query Result ---
#[derive(Serialize, Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

// --- Column Descriptor ---
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    /// Raw type as reported by the catalog, e.g. `varchar(255)`.
    pub native_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub ordinal_position: u32,
}

// --- Table Descriptor ---
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub source_name: String,
    pub engine: SourceEngine,
    /// Connection database; the namespace for MySQL, the catalog for Postgres.
    pub database: String,
    /// MySQL database or Postgres schema that qualifies the table.
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn display_name(&self) -> String {
        format!("{}.{}.{}", self.source_name, self.schema, self.table)
    }
}

// --- Data Chunk ---
/// One bounded window of rows moved in a single fetch/insert cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataChunk {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataChunk {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let target = name.trim().to_ascii_lowercase();
        self.columns
            .iter()
            .position(|column| column.trim().to_ascii_lowercase() == target)
    }

    /// Drops the named columns from the header and every row.
    pub fn without_columns(self, dropped: &[String]) -> DataChunk {
        if dropped.is_empty() {
            return self;
        }
        let keep = self
            .columns
            .iter()
            .map(|column| !dropped.iter().any(|d| d.eq_ignore_ascii_case(column)))
            .collect::<Vec<_>>();
        fn project<T>(values: Vec<T>, keep: &[bool]) -> Vec<T> {
            values
                .into_iter()
                .zip(keep.iter())
                .filter_map(|(value, kept)| kept.then_some(value))
                .collect()
        }
        DataChunk {
            columns: project(self.columns, &keep),
            rows: self
                .rows
                .into_iter()
                .map(|row| project(row, &keep))
                .collect(),
        }
    }
}
