use crate::data_transfer::mapper::MappedColumn;
use crate::data_transfer::sink::{ChunkRequest, DestinationColumn, DestinationSink, SourceReader};
use crate::db_types::{ColumnDescriptor, DataChunk, SourceEngine};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub fn column(name: &str, native_type: &str, nullable: bool, ordinal_position: u32) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        native_type: native_type.to_string(),
        nullable,
        is_primary_key: false,
        ordinal_position,
    }
}

pub fn text_row(values: &[Option<&str>]) -> Vec<Value> {
    values
        .iter()
        .map(|value| match value {
            Some(text) => Value::String(text.to_string()),
            None => Value::Null,
        })
        .collect()
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    let as_number = |value: &Value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

fn compare_keys(left: &[Value], right: &[Value]) -> Ordering {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| compare_values(a, b))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

#[derive(Debug, Clone)]
struct MemoryTable {
    name: String,
    columns: Vec<ColumnDescriptor>,
    primary_key: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn key_of(&self, row: &[Value], primary_key: &[String]) -> Vec<Value> {
        primary_key
            .iter()
            .map(|key| {
                self.index_of(key)
                    .and_then(|i| row.get(i).cloned())
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

/// Source fake that pages the way the SQL drivers do.
pub struct MemorySource {
    name: String,
    engine: SourceEngine,
    database: String,
    tables: Vec<MemoryTable>,
    unavailable: bool,
    failing_fetch_tables: HashSet<String>,
    fetch_requests: Mutex<Vec<ChunkRequest>>,
}

impl MemorySource {
    pub fn new(name: &str, engine: SourceEngine, database: &str) -> Self {
        Self {
            name: name.to_string(),
            engine,
            database: database.to_string(),
            tables: Vec::new(),
            unavailable: false,
            failing_fetch_tables: HashSet::new(),
            fetch_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_table(
        mut self,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        primary_key: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Self {
        self.tables.push(MemoryTable {
            name: name.to_string(),
            columns,
            primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
            rows,
        });
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_failing_fetch(mut self, table: &str) -> Self {
        self.failing_fetch_tables.insert(table.to_string());
        self
    }

    pub fn fetch_requests(&self) -> Vec<ChunkRequest> {
        self.fetch_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn table(&self, table: &str) -> Result<&MemoryTable, String> {
        if self.unavailable {
            return Err("Access denied for user 'loader'".to_string());
        }
        self.tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| format!("Table '{}' doesn't exist", table))
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine(&self) -> SourceEngine {
        self.engine
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), String> {
        if self.unavailable {
            Err("Access denied for user 'loader'".to_string())
        } else {
            Ok(())
        }
    }

    async fn list_tables(&self, _schema: &str) -> Result<Vec<String>, String> {
        if self.unavailable {
            return Err("Access denied for user 'loader'".to_string());
        }
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn table_columns(
        &self,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, String> {
        Ok(self.table(table)?.columns.clone())
    }

    async fn primary_key_columns(&self, _schema: &str, table: &str) -> Result<Vec<String>, String> {
        Ok(self.table(table)?.primary_key.clone())
    }

    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<DataChunk, String> {
        if let Ok(mut requests) = self.fetch_requests.lock() {
            requests.push(request.clone());
        }
        if self.failing_fetch_tables.contains(&request.table) {
            return Err(format!("You have an error in your SQL syntax near '{}'", request.table));
        }
        let table = self.table(&request.table)?;

        let mut rows = table.rows.clone();
        if request.uses_keyset() {
            rows.sort_by(|a, b| {
                compare_keys(
                    &table.key_of(a, &request.primary_key),
                    &table.key_of(b, &request.primary_key),
                )
            });
            if let Some(after_key) = &request.after_key {
                rows.retain(|row| {
                    compare_keys(&table.key_of(row, &request.primary_key), after_key)
                        == Ordering::Greater
                });
            }
        } else {
            rows = rows.into_iter().skip(request.offset as usize).collect();
        }
        rows.truncate(request.limit);

        let projected = rows
            .iter()
            .map(|row| {
                request
                    .columns
                    .iter()
                    .map(|column| {
                        table
                            .index_of(column)
                            .and_then(|i| row.get(i).cloned())
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            })
            .collect();
        Ok(DataChunk::new(request.columns.clone(), projected))
    }

    async fn count_rows(&self, _schema: &str, table: &str) -> Result<u64, String> {
        Ok(self.table(table)?.rows.len() as u64)
    }
}

#[derive(Debug, Clone, Default)]
struct DestinationTable {
    columns: Vec<DestinationColumn>,
    order_by: Vec<String>,
    rows: Vec<Map<String, Value>>,
    dedup_tokens: HashSet<String>,
}

/// Destination fake that records every mutating call in order.
#[derive(Default)]
pub struct MemoryDestination {
    database: String,
    tables: Mutex<HashMap<String, DestinationTable>>,
    events: Mutex<Vec<String>>,
    unreachable_tables: HashSet<String>,
    transient_insert_failures: Mutex<HashMap<String, u32>>,
    insert_budgets: Mutex<HashMap<String, u32>>,
    lost_acks: Mutex<HashMap<String, u32>>,
    down: bool,
}

impl MemoryDestination {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn down(mut self) -> Self {
        self.down = true;
        self
    }

    pub fn with_unreachable_table(mut self, table: &str) -> Self {
        self.unreachable_tables.insert(table.to_string());
        self
    }

    pub fn with_transient_insert_failures(self, table: &str, failures: u32) -> Self {
        if let Ok(mut pending) = self.transient_insert_failures.lock() {
            pending.insert(table.to_string(), failures);
        }
        self
    }

    /// Lets `successful_inserts` inserts through, then rejects the rest.
    pub fn with_insert_budget(self, table: &str, successful_inserts: u32) -> Self {
        if let Ok(mut budgets) = self.insert_budgets.lock() {
            budgets.insert(table.to_string(), successful_inserts);
        }
        self
    }

    /// Stores the next `count` inserts, then reports them as failed the way
    /// a timed-out request whose block already committed would.
    pub fn with_lost_insert_acks(self, table: &str, count: u32) -> Self {
        if let Ok(mut lost) = self.lost_acks.lock() {
            lost.insert(table.to_string(), count);
        }
        self
    }

    pub fn with_existing_table(self, table: &str, columns: &[(&str, &str)]) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(
                table.to_string(),
                DestinationTable {
                    columns: columns
                        .iter()
                        .map(|(name, type_name)| DestinationColumn {
                            name: name.to_string(),
                            type_name: type_name.to_string(),
                        })
                        .collect(),
                    ..DestinationTable::default()
                },
            );
        }
        self
    }

    pub fn with_rows(self, table: &str, rows: Vec<Map<String, Value>>) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table.to_string()).or_default().rows.extend(rows);
        }
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| {
                tables
                    .get(table)
                    .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            })
            .unwrap_or_default()
    }

    pub fn order_by(&self, table: &str) -> Vec<String> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.order_by.clone()))
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn check_reachable(&self, table: &str) -> Result<(), String> {
        if self.down || self.unreachable_tables.contains(table) {
            return Err(format!("HTTP request failed: Connection refused while writing {}", table));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationSink for MemoryDestination {
    fn database(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), String> {
        if self.down {
            Err("HTTP request failed: Connection refused".to_string())
        } else {
            Ok(())
        }
    }

    async fn table_columns(&self, table: &str) -> Result<Option<Vec<DestinationColumn>>, String> {
        self.check_reachable(table)?;
        let tables = self.tables.lock().map_err(|e| e.to_string())?;
        Ok(tables.get(table).map(|t| t.columns.clone()))
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[MappedColumn],
        order_by: &[String],
    ) -> Result<(), String> {
        self.check_reachable(table)?;
        let mut tables = self.tables.lock().map_err(|e| e.to_string())?;
        tables.entry(table.to_string()).or_insert_with(|| DestinationTable {
            columns: columns
                .iter()
                .map(|c| DestinationColumn {
                    name: c.name().to_string(),
                    type_name: c.clickhouse_type(),
                })
                .collect(),
            order_by: order_by.to_vec(),
            ..DestinationTable::default()
        });
        drop(tables);
        self.record(format!("create:{}", table));
        Ok(())
    }

    async fn add_columns(&self, table: &str, columns: &[MappedColumn]) -> Result<(), String> {
        self.check_reachable(table)?;
        let mut tables = self.tables.lock().map_err(|e| e.to_string())?;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table {} does not exist", table))?;
        for column in columns {
            if !target.columns.iter().any(|c| c.name == column.name()) {
                target.columns.push(DestinationColumn {
                    name: column.name().to_string(),
                    type_name: column.clickhouse_type(),
                });
            }
        }
        drop(tables);
        self.record(format!("alter:{}", table));
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<(), String> {
        self.check_reachable(table)?;
        let mut tables = self.tables.lock().map_err(|e| e.to_string())?;
        if let Some(target) = tables.get_mut(table) {
            target.rows.clear();
        }
        drop(tables);
        self.record(format!("truncate:{}", table));
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &str,
        chunk: &DataChunk,
        dedup_token: &str,
    ) -> Result<u64, String> {
        self.check_reachable(table)?;
        {
            let mut pending = self
                .transient_insert_failures
                .lock()
                .map_err(|e| e.to_string())?;
            if let Some(remaining) = pending.get_mut(table) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err("Connection reset by peer (os error 104)".to_string());
                }
            }
            let mut budgets = self.insert_budgets.lock().map_err(|e| e.to_string())?;
            if let Some(remaining) = budgets.get_mut(table) {
                if *remaining == 0 {
                    return Err("Code: 241. DB::Exception: Memory limit exceeded".to_string());
                }
                *remaining -= 1;
            }
        }

        let mut tables = self.tables.lock().map_err(|e| e.to_string())?;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table {} does not exist", table))?;
        if !target.dedup_tokens.insert(dedup_token.to_string()) {
            drop(tables);
            self.record(format!("deduplicated:{}:{}", table, chunk.len()));
            return Ok(chunk.len() as u64);
        }
        for row in &chunk.rows {
            let object = chunk
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect::<Map<String, Value>>();
            target.rows.push(object);
        }
        drop(tables);
        self.record(format!("insert:{}:{}", table, chunk.len()));

        let mut lost = self.lost_acks.lock().map_err(|e| e.to_string())?;
        if let Some(remaining) = lost.get_mut(table) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err("insert chunk timed out after 60s".to_string());
            }
        }
        Ok(chunk.len() as u64)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, String> {
        self.check_reachable(table)?;
        let tables = self.tables.lock().map_err(|e| e.to_string())?;
        tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| format!("Table {} does not exist", table))
    }
}
