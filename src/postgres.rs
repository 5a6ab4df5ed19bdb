// =====================================================
// PostgreSQL SOURCE OPERATIONS
// =====================================================

use crate::config::SourceConnectionSpec;
use crate::data_transfer::planner::{build_chunk_query, build_count_query};
use crate::data_transfer::sink::{ChunkRequest, SourceReader};
use crate::db_types::*;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{ConnectOptions, Pool, Postgres, Row, ValueRef};
use std::time::Duration;

// --- Connection ---

pub fn parse_ssl_mode(value: &str) -> Result<PgSslMode, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "disable" => Ok(PgSslMode::Disable),
        "allow" => Ok(PgSslMode::Allow),
        "prefer" => Ok(PgSslMode::Prefer),
        "require" => Ok(PgSslMode::Require),
        "verify-ca" | "verify_ca" => Ok(PgSslMode::VerifyCa),
        "verify-full" | "verify_full" => Ok(PgSslMode::VerifyFull),
        other => Err(format!("Unknown sslMode '{}'", other)),
    }
}

pub async fn create_pool(
    spec: &SourceConnectionSpec,
    connect_timeout: Duration,
    max_connections: u32,
) -> Result<Pool<Postgres>, String> {
    let mut options = PgConnectOptions::new()
        .host(&spec.host)
        .port(spec.port())
        .username(&spec.username)
        .database(&spec.database);

    if let Some(pwd) = &spec.password {
        options = options.password(pwd);
    }

    if let Some(ssl) = &spec.ssl_mode {
        options = options.ssl_mode(parse_ssl_mode(ssl)?);
    }

    options = options.log_statements(log::LevelFilter::Debug);

    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(connect_timeout)
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(options)
        .await
        .map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("connection refused") || err_msg.contains("os error 111") {
                return format!(
                    "Connection refused: check if PostgreSQL is running on {}:{}",
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

fn text_value(row: &PgRow, index: usize) -> Value {
    let is_null = row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return Value::Null;
    }
    row.try_get_unchecked::<String, _>(index)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

// --- Catalog ---

pub async fn get_tables(pool: &Pool<Postgres>, schema: &str) -> Result<Vec<String>, String> {
    let rows = sqlx::query(
        "SELECT table_name::text AS table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch tables: {}", e))?;

    Ok(rows
        .iter()
        .map(|row| row.try_get::<String, _>("table_name").unwrap_or_default())
        .collect())
}

/// Uses `format_type` so the native type keeps its modifiers, e.g. `numeric(12,2)`.
/// Key membership is left to the caller, which reads `pg_index` once per table.
pub async fn get_table_columns(
    pool: &Pool<Postgres>,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>, String> {
    let rows = sqlx::query(
        r#"
        SELECT
            a.attname::text AS column_name,
            pg_catalog.format_type(a.atttypid, a.atttypmod) AS native_type,
            NOT a.attnotnull AS is_nullable,
            a.attnum::int4 AS ordinal_position
        FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
          AND c.relname = $2
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch columns for {}: {}", table, e))?;

    Ok(rows
        .iter()
        .map(|row| {
            ColumnDescriptor {
                name: row.try_get("column_name").unwrap_or_default(),
                is_primary_key: false,
                native_type: row.try_get("native_type").unwrap_or_default(),
                nullable: row.try_get("is_nullable").unwrap_or(true),
                ordinal_position: row
                    .try_get::<i32, _>("ordinal_position")
                    .unwrap_or_default()
                    .max(0) as u32,
            }
        })
        .collect())
}

pub async fn get_primary_key_columns(
    pool: &Pool<Postgres>,
    schema: &str,
    table: &str,
) -> Result<Vec<String>, String> {
    let rows = sqlx::query(
        r#"
        SELECT a.attname::text AS column_name
        FROM pg_catalog.pg_index i
        JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
        WHERE i.indisprimary
          AND n.nspname = $1
          AND c.relname = $2
        ORDER BY k.ord
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch primary key for {}: {}", table, e))?;

    Ok(rows
        .iter()
        .map(|row| row.try_get::<String, _>("column_name").unwrap_or_default())
        .collect())
}

// --- Data ---

pub async fn fetch_chunk(
    pool: &Pool<Postgres>,
    request: &ChunkRequest,
) -> Result<DataChunk, String> {
    let sql = build_chunk_query(SourceEngine::Postgres, request)?;
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

pub async fn count_rows(pool: &Pool<Postgres>, schema: &str, table: &str) -> Result<u64, String> {
    let sql = build_count_query(SourceEngine::Postgres, schema, table);
    let count: i64 = sqlx::query_scalar(&sql)
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to count {}: {}", table, e))?;
    Ok(count.max(0) as u64)
}

// --- Source Handle ---

pub struct PostgresSource {
    name: String,
    database: String,
    pool: Pool<Postgres>,
}

impl PostgresSource {
    pub fn new(spec: &SourceConnectionSpec, pool: Pool<Postgres>) -> Self {
        Self {
            name: spec.name.clone(),
            database: spec.database.clone(),
            pool,
        }
    }
}

#[async_trait]
impl SourceReader for PostgresSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine(&self) -> SourceEngine {
        SourceEngine::Postgres
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
