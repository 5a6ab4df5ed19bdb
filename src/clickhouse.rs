// =====================================================
// ClickHouse NATIVE HTTP OPERATIONS
// =====================================================

use crate::config::DestinationSpec;
use crate::data_transfer::mapper::MappedColumn;
use crate::data_transfer::sink::{DestinationColumn, DestinationSink};
use crate::db_types::{DataChunk, QueryResult};
use async_trait::async_trait;
use clickhouse::Client;
use serde_json::{Map, Value};
use std::time::Duration;

/// Settings sent with every insert so text temporal values and nulls in
/// non-nullable columns are accepted the same way the coercer emits them.
const INSERT_SETTINGS: [(&str, &str); 2] = [
    ("date_time_input_format", "best_effort"),
    ("input_format_null_as_default", "1"),
];

/// Recent insert blocks a plain MergeTree remembers for token deduplication.
/// A retry only ever repeats the chunk just sent, so a short window suffices.
const DEDUPLICATION_WINDOW: u32 = 100;

// --- Identifiers & DDL ---

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

fn escape_string_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn qualified_table(database: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(database), quote_identifier(table))
}

fn column_definition(column: &MappedColumn) -> String {
    format!("{} {}", quote_identifier(column.name()), column.clickhouse_type())
}

pub fn build_create_table_sql(
    database: &str,
    table: &str,
    columns: &[MappedColumn],
    order_by: &[String],
) -> String {
    let definitions = columns
        .iter()
        .map(|column| format!("    {}", column_definition(column)))
        .collect::<Vec<_>>()
        .join(",\n");
    let sorting_key = if order_by.is_empty() {
        "tuple()".to_string()
    } else {
        format!(
            "({})",
            order_by
                .iter()
                .map(|column| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n) ENGINE = MergeTree ORDER BY {} \
         SETTINGS non_replicated_deduplication_window = {}",
        qualified_table(database, table),
        definitions,
        sorting_key,
        DEDUPLICATION_WINDOW
    )
}

pub fn build_add_columns_sql(database: &str, table: &str, columns: &[MappedColumn]) -> String {
    let clauses = columns
        .iter()
        .map(|column| format!("ADD COLUMN IF NOT EXISTS {}", column_definition(column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("ALTER TABLE {} {}", qualified_table(database, table), clauses)
}

/// Renders a chunk as JSONEachRow lines keyed by column name.
pub fn build_insert_body(chunk: &DataChunk) -> Result<String, String> {
    let mut body = String::new();
    for (index, row) in chunk.rows.iter().enumerate() {
        if row.len() != chunk.columns.len() {
            return Err(format!(
                "Row {} has {} values but the chunk has {} columns",
                index + 1,
                row.len(),
                chunk.columns.len()
            ));
        }
        let object = chunk
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect::<Map<String, Value>>();
        let line = serde_json::to_string(&Value::Object(object))
            .map_err(|e| format!("Failed to encode row {}: {}", index + 1, e))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

fn build_insert_query(database: &str, table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) FORMAT JSONEachRow",
        qualified_table(database, table),
        column_list
    )
}

// --- Connection ---

pub fn create_client(spec: &DestinationSpec) -> Result<Client, String> {
    if spec.host.trim().is_empty() {
        return Err("ClickHouse host is required".to_string());
    }

    let mut client = Client::default()
        .with_url(spec.url())
        .with_user(&spec.username);

    if let Some(pwd) = &spec.password {
        client = client.with_password(pwd);
    }

    if !spec.database.trim().is_empty() {
        client = client.with_database(&spec.database);
    }

    Ok(client)
}

pub fn insert_settings(dedup_token: &str) -> Vec<(&'static str, &str)> {
    let mut settings: Vec<(&'static str, &str)> = INSERT_SETTINGS.to_vec();
    settings.push(("insert_deduplicate", "1"));
    settings.push(("insert_deduplication_token", dedup_token));
    settings
}

/// Credentials travel as headers so they never appear in request URLs.
pub fn auth_headers(spec: &DestinationSpec) -> Vec<(&'static str, String)> {
    let mut headers = vec![("X-ClickHouse-User", spec.username.clone())];
    if let Some(pwd) = &spec.password {
        headers.push(("X-ClickHouse-Key", pwd.clone()));
    }
    headers
}

pub struct ClickHouseDestination {
    spec: DestinationSpec,
    client: Client,
    http: reqwest::Client,
}

impl ClickHouseDestination {
    pub fn new(spec: &DestinationSpec, connect_timeout: Duration) -> Result<Self, String> {
        let client = create_client(spec)?;
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            spec: spec.clone(),
            client,
            http,
        })
    }

    // --- Raw HTTP Query Execution (to avoid clickhouse crate's FORMAT RowBinary enforcement) ---

    async fn execute_raw_query(
        &self,
        query: &str,
        data: Option<String>,
        settings: &[(&str, &str)],
    ) -> Result<String, String> {
        let mut rb = self.http.post(self.spec.url());
        for (name, value) in auth_headers(&self.spec) {
            rb = rb.header(name, value);
        }
        if !self.spec.database.is_empty() {
            rb = rb.query(&[("database", &self.spec.database)]);
        }
        for (key, value) in settings {
            rb = rb.query(&[(key, value)]);
        }

        // Inserts carry the statement in the URL and the rows in the body.
        let rb = match data {
            Some(body) => rb.query(&[("query", query)]).body(body),
            None => rb.body(query.to_string()),
        };

        let response = rb
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(format!("ClickHouse error ({}): {}", status, err_body.trim()));
        }

        response
            .text()
            .await
            .map_err(|e| format!("Failed to read response body: {}", e))
    }

    async fn execute_query_generic(&self, query: &str) -> Result<QueryResult, String> {
        let base_query = query.trim().trim_end_matches(';');
        let query_with_format = format!("{} FORMAT JSONCompactEachRowWithNamesAndTypes", base_query);
        let body = self.execute_raw_query(&query_with_format, None, &[]).await?;
        parse_compact_each_row(&body)
    }

    pub async fn execute_ddl(&self, statement: &str) -> Result<(), String> {
        log::debug!("ClickHouse DDL: {}", statement);
        self.execute_raw_query(statement, None, &[]).await.map(|_| ())
    }
}

/// Parses `JSONCompactEachRowWithNamesAndTypes`: names line, types line, rows.
pub fn parse_compact_each_row(body: &str) -> Result<QueryResult, String> {
    let mut result = QueryResult::default();

    for (index, line) in body.lines().filter(|line| !line.trim().is_empty()).enumerate() {
        let arr: Vec<Value> = serde_json::from_str(line)
            .map_err(|e| format!("Failed to parse JSON line ({}): {}", line, e))?;

        match index {
            0 => {
                result.columns = arr
                    .into_iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect();
            }
            1 => continue,
            _ => result.rows.push(arr),
        }
    }

    Ok(result)
}

#[async_trait]
impl DestinationSink for ClickHouseDestination {
    fn database(&self) -> &str {
        &self.spec.database
    }

    async fn ping(&self) -> Result<(), String> {
        let result: u8 = self
            .client
            .query("SELECT 1")
            .fetch_one()
            .await
            .map_err(|e| format!("ClickHouse connection failed: {}", e))?;

        if result == 1 {
            Ok(())
        } else {
            Err("ClickHouse returned unexpected result during connection test".to_string())
        }
    }

    async fn table_columns(&self, table: &str) -> Result<Option<Vec<DestinationColumn>>, String> {
        let query = format!(
            "SELECT name, type FROM system.columns WHERE database = '{}' AND table = '{}' ORDER BY position",
            escape_string_literal(&self.spec.database),
            escape_string_literal(table)
        );
        let result = self.execute_query_generic(&query).await?;

        let name_idx = result.columns.iter().position(|c| c == "name");
        let type_idx = result.columns.iter().position(|c| c == "type");

        let columns = result
            .rows
            .iter()
            .map(|row| DestinationColumn {
                name: name_idx
                    .and_then(|i| row.get(i))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                type_name: type_idx
                    .and_then(|i| row.get(i))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect::<Vec<_>>();

        // Every existing table has at least one column.
        if columns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(columns))
        }
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[MappedColumn],
        order_by: &[String],
    ) -> Result<(), String> {
        let statement = build_create_table_sql(&self.spec.database, table, columns, order_by);
        self.execute_ddl(&statement).await
    }

    async fn add_columns(&self, table: &str, columns: &[MappedColumn]) -> Result<(), String> {
        if columns.is_empty() {
            return Ok(());
        }
        let statement = build_add_columns_sql(&self.spec.database, table, columns);
        self.execute_ddl(&statement).await
    }

    async fn truncate(&self, table: &str) -> Result<(), String> {
        let statement = format!(
            "TRUNCATE TABLE IF EXISTS {}",
            qualified_table(&self.spec.database, table)
        );
        self.execute_ddl(&statement).await
    }

    async fn insert_rows(
        &self,
        table: &str,
        chunk: &DataChunk,
        dedup_token: &str,
    ) -> Result<u64, String> {
        if chunk.is_empty() {
            return Ok(0);
        }
        let query = build_insert_query(&self.spec.database, table, &chunk.columns);
        let body = build_insert_body(chunk)?;
        let settings = insert_settings(dedup_token);
        self.execute_raw_query(&query, Some(body), &settings)
            .await?;
        Ok(chunk.len() as u64)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, String> {
        let query = format!(
            "SELECT count() FROM {}",
            qualified_table(&self.spec.database, table)
        );
        self.client
            .query(&query)
            .fetch_one::<u64>()
            .await
            .map_err(|e| format!("ClickHouse count failed for {}: {}", table, e))
    }
}

#[cfg(test)]
mod tests;
