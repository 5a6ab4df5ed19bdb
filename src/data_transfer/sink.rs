use crate::data_transfer::mapper::MappedColumn;
use crate::db_types::{ColumnDescriptor, DataChunk, SourceEngine};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One bounded read against a source table.
///
/// With a primary key the read is keyset-paged (`after_key` is the last key
/// seen, `None` for the first page); without one it falls back to `offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub after_key: Option<Vec<Value>>,
    pub offset: u64,
    pub limit: usize,
}

impl ChunkRequest {
    pub fn uses_keyset(&self) -> bool {
        !self.primary_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationColumn {
    pub name: String,
    /// Full ClickHouse type, including any `Nullable(...)` wrapper.
    pub type_name: String,
}

/// Read side of a relational source. One implementation per engine family.
#[async_trait]
pub trait SourceReader: Send + Sync {
    fn name(&self) -> &str;

    fn engine(&self) -> SourceEngine;

    fn database(&self) -> &str;

    async fn ping(&self) -> Result<(), String>;

    /// Base tables only; views are not snapshotted.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, String>;

    /// Columns in ordinal order.
    async fn table_columns(&self, schema: &str, table: &str)
        -> Result<Vec<ColumnDescriptor>, String>;

    /// Primary-key columns in key order; empty when the table has none.
    async fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>, String>;

    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<DataChunk, String>;

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64, String>;
}

/// Write side of the analytical store.
#[async_trait]
pub trait DestinationSink: Send + Sync {
    fn database(&self) -> &str;

    async fn ping(&self) -> Result<(), String>;

    /// `None` when the table does not exist.
    async fn table_columns(&self, table: &str) -> Result<Option<Vec<DestinationColumn>>, String>;

    async fn create_table(
        &self,
        table: &str,
        columns: &[MappedColumn],
        order_by: &[String],
    ) -> Result<(), String>;

    async fn add_columns(&self, table: &str, columns: &[MappedColumn]) -> Result<(), String>;

    async fn truncate(&self, table: &str) -> Result<(), String>;

    /// Returns the number of rows the destination accepted. A repeated
    /// `dedup_token` means a retry of a block that may already be stored.
    async fn insert_rows(
        &self,
        table: &str,
        chunk: &DataChunk,
        dedup_token: &str,
    ) -> Result<u64, String>;

    async fn count_rows(&self, table: &str) -> Result<u64, String>;
}
