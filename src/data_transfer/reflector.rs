use crate::data_transfer::retry::with_timeout;
use crate::data_transfer::sink::SourceReader;
use crate::db_types::TableDescriptor;
use crate::error::{LoadError, Result};
use std::time::Duration;

/// Allow/deny lists applied to reflected table names.
///
/// Entries match case-insensitively against `table`, `schema.table` or
/// `source.table`. An empty include list admits every table.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

fn normalize_entries(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: normalize_entries(include),
            exclude: normalize_entries(exclude),
        }
    }

    fn matches(entries: &[String], source: &str, schema: &str, table: &str) -> bool {
        let table = table.to_ascii_lowercase();
        let by_schema = format!("{}.{}", schema.to_ascii_lowercase(), table);
        let by_source = format!("{}.{}", source.to_ascii_lowercase(), table);
        entries
            .iter()
            .any(|entry| *entry == table || *entry == by_schema || *entry == by_source)
    }

    pub fn allows(&self, source: &str, schema: &str, table: &str) -> bool {
        if Self::matches(&self.exclude, source, schema, table) {
            return false;
        }
        self.include.is_empty() || Self::matches(&self.include, source, schema, table)
    }
}

/// Discovers the base tables of one source namespace, in catalog order.
///
/// Any catalog failure makes the whole source unavailable; a namespace with no
/// tables at all yields `EmptySchema`.
pub async fn reflect(
    source: &dyn SourceReader,
    schema: &str,
    filter: &TableFilter,
    timeout: Duration,
) -> Result<Vec<TableDescriptor>> {
    let source_name = source.name().to_string();
    let unavailable = |err: LoadError| LoadError::source_unavailable(&source_name, err.to_string());

    with_timeout("ping source", timeout, source.ping())
        .await
        .map_err(unavailable)?;

    let tables = with_timeout("list tables", timeout, source.list_tables(schema))
        .await
        .map_err(unavailable)?;

    if tables.is_empty() {
        return Err(LoadError::EmptySchema {
            source_name: source_name.clone(),
            database: schema.to_string(),
        });
    }

    let mut descriptors = Vec::new();
    for table in tables {
        if !filter.allows(&source_name, schema, &table) {
            log::debug!("Skipping {}.{} (filtered)", source_name, table);
            continue;
        }

        let columns = with_timeout("read columns", timeout, source.table_columns(schema, &table))
            .await
            .map_err(unavailable)?;
        if columns.is_empty() {
            log::warn!("{}.{}.{} has no readable columns, skipping", source_name, schema, table);
            continue;
        }

        let primary_key = with_timeout(
            "read primary key",
            timeout,
            source.primary_key_columns(schema, &table),
        )
        .await
        .map_err(unavailable)?;

        let mut columns = columns;
        columns.sort_by_key(|column| column.ordinal_position);
        for column in columns.iter_mut() {
            column.is_primary_key = primary_key
                .iter()
                .any(|key| key.eq_ignore_ascii_case(&column.name));
        }

        descriptors.push(TableDescriptor {
            source_name: source_name.clone(),
            engine: source.engine(),
            database: source.database().to_string(),
            schema: schema.to_string(),
            table,
            columns,
            primary_key,
        });
    }

    log::info!(
        "Reflected {} table(s) from {} ({})",
        descriptors.len(),
        source_name,
        schema
    );
    Ok(descriptors)
}
