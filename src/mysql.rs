// =====================================================
// MySQL / MariaDB SOURCE OPERATIONS
// =====================================================

use crate::config::SourceConnectionSpec;
use crate::data_transfer::planner::{build_chunk_query, build_count_query};
use crate::data_transfer::sink::{ChunkRequest, SourceReader};
use crate::db_types::*;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{ConnectOptions, MySql, Pool, Row, ValueRef};
use std::time::Duration;

// --- Connection ---

pub async fn create_pool(
    spec: &SourceConnectionSpec,
    connect_timeout: Duration,
    max_connections: u32,
) -> Result<Pool<MySql>, String> {
    let mut options = MySqlConnectOptions::new()
        .host(&spec.host)
        .port(spec.port())
        .username(&spec.username)
        .database(&spec.database);

    if let Some(pwd) = &spec.password {
        options = options.password(pwd);
    }

    options = options.log_statements(log::LevelFilter::Debug);

    MySqlPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(connect_timeout)
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(options)
        .await
        .map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("os error 111") {
                return format!(
                    "Connection refused ({}): check if the server is running on {}:{}",
                    err_msg,
                    spec.host,
                    spec.port()
                );
            }
            if err_msg.contains("timed out") {
                return format!(
                    "Connection timed out: {}:{} did not respond within {}s",
                    spec.host,
                    spec.port(),
                    connect_timeout.as_secs()
                );
            }
            format!("Failed to create pool: {}", e)
        })
}

// --- Row Decoding ---

/// Catalog strings come back as VARBINARY on some server versions.
fn row_string(row: &MySqlRow, index: usize) -> String {
    row.try_get::<String, _>(index).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(index)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

/// Text-protocol value as the server rendered it; binary data is decoded lossily.
fn text_value(row: &MySqlRow, index: usize) -> Value {
    let is_null = row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return Value::Null;
    }

    row.try_get_unchecked::<String, _>(index)
        .map(Value::String)
        .or_else(|_| {
            row.try_get_unchecked::<Vec<u8>, _>(index)
                .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        })
        .unwrap_or(Value::Null)
}

// --- Catalog ---

pub async fn get_tables(pool: &Pool<MySql>, database: &str) -> Result<Vec<String>, String> {
    let rows = sqlx::query(
        "SELECT TABLE_NAME FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch tables: {}", e))?;

    Ok(rows.iter().map(|row| row_string(row, 0)).collect())
}

pub async fn get_table_columns(
    pool: &Pool<MySql>,
    database: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>, String> {
    let rows = sqlx::query(
        "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, \
         CAST(ORDINAL_POSITION AS SIGNED) AS ORDINAL_POSITION \
         FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch columns for {}: {}", table, e))?;

    Ok(rows
        .iter()
        .map(|row| ColumnDescriptor {
            name: row_string(row, 0),
            native_type: row_string(row, 1),
            nullable: row_string(row, 2).eq_ignore_ascii_case("YES"),
            is_primary_key: row_string(row, 3).eq_ignore_ascii_case("PRI"),
            ordinal_position: row.try_get::<i64, _>(4).unwrap_or_default().max(0) as u32,
        })
        .collect())
}

pub async fn get_primary_key_columns(
    pool: &Pool<MySql>,
    database: &str,
    table: &str,
) -> Result<Vec<String>, String> {
    let rows = sqlx::query(
        "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
         ORDER BY ORDINAL_POSITION",
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch primary key for {}: {}", table, e))?;

    Ok(rows.iter().map(|row| row_string(row, 0)).collect())
}

// --- Data ---

pub async fn fetch_chunk(pool: &Pool<MySql>, request: &ChunkRequest) -> Result<DataChunk, String> {
    let sql = build_chunk_query(SourceEngine::MySQL, request)?;
    let rows = sqlx::raw_sql(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| format!("Failed to read {}: {}", request.table, e))?;

    let width = request.columns.len();
    let data = rows
        .iter()
        .map(|row| (0..width).map(|i| text_value(row, i)).collect())
        .collect();
    Ok(DataChunk::new(request.columns.clone(), data))
}

pub async fn count_rows(pool: &Pool<MySql>, database: &str, table: &str) -> Result<u64, String> {
    let sql = build_count_query(SourceEngine::MySQL, database, table);
    let row = sqlx::raw_sql(&sql)
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to count {}: {}", table, e))?;
    let raw = match text_value(&row, 0) {
        Value::String(text) => text,
        other => other.to_string(),
    };
    raw.trim()
        .parse::<u64>()
        .map_err(|e| format!("Unexpected count '{}' for {}: {}", raw, table, e))
}

// --- Source Handle ---

pub struct MySqlSource {
    name: String,
    engine: SourceEngine,
    database: String,
    pool: Pool<MySql>,
}

impl MySqlSource {
    pub fn new(spec: &SourceConnectionSpec, pool: Pool<MySql>) -> Self {
        Self {
            name: spec.name.clone(),
            engine: spec.engine,
            database: spec.database.clone(),
            pool,
        }
    }
}

#[async_trait]
impl SourceReader for MySqlSource {
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
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| format!("Query failed: {}", e))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, String> {
        get_tables(&self.pool, schema).await
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, String> {
        get_table_columns(&self.pool, schema, table).await
    }

    async fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>, String> {
        get_primary_key_columns(&self.pool, schema, table).await
    }

    async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<DataChunk, String> {
        fetch_chunk(&self.pool, request).await
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64, String> {
        count_rows(&self.pool, schema, table).await
    }
}
