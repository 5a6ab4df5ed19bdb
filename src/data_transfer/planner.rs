use crate::data_transfer::mapper::{map_table, MappedColumn};
use crate::data_transfer::sink::ChunkRequest;
use crate::db_types::{DataChunk, SourceEngine, TableDescriptor};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

const DESTINATION_PREFIX: &str = "src";
const DEFAULT_POSTGRES_SCHEMA: &str = "public";

/// Everything the engine needs to move one source table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePlan {
    pub table: TableDescriptor,
    pub columns: Vec<MappedColumn>,
    pub destination_table: String,
}

impl TablePlan {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn order_by(&self) -> &[String] {
        &self.table.primary_key
    }
}

fn sanitize_component(value: &str) -> String {
    let cleaned = value
        .trim()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect::<String>();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// `src__{source}__{database}__`, the part of every destination name that
/// belongs to one source. Sources whose prefixes overlap would share tables.
pub fn destination_prefix(source_name: &str, database: &str) -> String {
    format!(
        "{}__{}__{}__",
        DESTINATION_PREFIX,
        sanitize_component(source_name),
        sanitize_component(database)
    )
}

/// `src__{source}__{database}__{table}`, unique per source table.
///
/// Postgres tables outside `public` carry their schema in the table part so
/// same-named tables in different schemas do not collide.
pub fn destination_table_name(table: &TableDescriptor) -> String {
    let table_part = match table.engine {
        SourceEngine::Postgres if !table.schema.eq_ignore_ascii_case(DEFAULT_POSTGRES_SCHEMA) => {
            format!("{}_{}", table.schema, table.table)
        }
        _ => table.table.clone(),
    };
    format!(
        "{}{}",
        destination_prefix(&table.source_name, &table.database),
        sanitize_component(&table_part)
    )
}

/// Splits plans into those with a destination table of their own and those
/// whose sanitized name repeats an earlier plan's. The error names the table
/// that claimed the destination first.
pub fn partition_colliding_plans(
    plans: Vec<TablePlan>,
) -> (Vec<TablePlan>, Vec<(TablePlan, String)>) {
    let mut owners: HashMap<String, String> = HashMap::with_capacity(plans.len());
    let mut unique = Vec::with_capacity(plans.len());
    let mut colliding = Vec::new();
    for plan in plans {
        match owners.get(&plan.destination_table) {
            Some(owner) => {
                let message = format!(
                    "Destination table {} is already loaded from {}",
                    plan.destination_table, owner
                );
                colliding.push((plan, message));
            }
            None => {
                owners.insert(plan.destination_table.clone(), plan.table.display_name());
                unique.push(plan);
            }
        }
    }
    (unique, colliding)
}

pub fn plan_table(table: TableDescriptor) -> TablePlan {
    let columns = map_table(&table);
    let destination_table = destination_table_name(&table);
    TablePlan {
        table,
        columns,
        destination_table,
    }
}

// --- Source SQL ---

pub fn quote_source_identifier(engine: SourceEngine, name: &str) -> String {
    if engine.is_mysql_family() {
        format!("`{}`", name.replace('`', "``"))
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Renders a keyset cursor value as an SQL literal. Nulls never qualify as a cursor.
pub fn quote_source_literal(engine: SourceEngine, value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Err("Primary-key cursor value is NULL".to_string()),
        Value::Bool(flag) => Ok(if *flag { "TRUE" } else { "FALSE" }.to_string()),
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => {
            let escaped = if engine.is_mysql_family() {
                text.replace('\\', "\\\\").replace('\'', "''")
            } else {
                text.replace('\'', "''")
            };
            Ok(format!("'{}'", escaped))
        }
        other => Err(format!("Unsupported primary-key cursor value: {}", other)),
    }
}

fn qualified_source_table(engine: SourceEngine, schema: &str, table: &str) -> String {
    format!(
        "{}.{}",
        quote_source_identifier(engine, schema),
        quote_source_identifier(engine, table)
    )
}

/// Builds one page query. Keyset pages follow the primary key; tables without
/// one fall back to LIMIT/OFFSET over a total order of all columns.
pub fn build_chunk_query(engine: SourceEngine, request: &ChunkRequest) -> Result<String, String> {
    if request.columns.is_empty() {
        return Err(format!("No columns to select from {}", request.table));
    }

    let column_ref = |name: &str| format!("src.{}", quote_source_identifier(engine, name));
    let select_list = request
        .columns
        .iter()
        .map(|name| match engine {
            // Text output keeps every value in its canonical source rendering.
            SourceEngine::Postgres => format!(
                "{}::text AS {}",
                column_ref(name),
                quote_source_identifier(engine, name)
            ),
            _ => column_ref(name),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {} FROM {} AS src",
        select_list,
        qualified_source_table(engine, &request.schema, &request.table)
    );

    if request.uses_keyset() {
        let key_refs = request
            .primary_key
            .iter()
            .map(|name| column_ref(name))
            .collect::<Vec<_>>();

        if let Some(after_key) = &request.after_key {
            if after_key.len() != key_refs.len() {
                return Err(format!(
                    "Cursor has {} values but {} has {} key columns",
                    after_key.len(),
                    request.table,
                    key_refs.len()
                ));
            }
            let literals = after_key
                .iter()
                .map(|value| quote_source_literal(engine, value))
                .collect::<Result<Vec<_>, _>>()?;
            if key_refs.len() == 1 {
                sql.push_str(&format!(" WHERE {} > {}", key_refs[0], literals[0]));
            } else {
                sql.push_str(&format!(
                    " WHERE ({}) > ({})",
                    key_refs.join(", "),
                    literals.join(", ")
                ));
            }
        }
        sql.push_str(&format!(" ORDER BY {} LIMIT {}", key_refs.join(", "), request.limit));
    } else {
        // Every selected column, by position, so pages never overlap.
        let positions = (1..=request.columns.len())
            .map(|position| position.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            " ORDER BY {} LIMIT {} OFFSET {}",
            positions, request.limit, request.offset
        ));
    }

    Ok(sql)
}

pub fn build_count_query(engine: SourceEngine, schema: &str, table: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {}",
        qualified_source_table(engine, schema, table)
    )
}

/// Primary-key values of the last row, used as the next keyset cursor.
pub fn last_key_of_chunk(
    chunk: &DataChunk,
    primary_key: &[String],
) -> Result<Option<Vec<Value>>, String> {
    let Some(last_row) = chunk.rows.last() else {
        return Ok(None);
    };

    let mut key = Vec::with_capacity(primary_key.len());
    for column in primary_key {
        let index = chunk
            .column_index(column)
            .ok_or_else(|| format!("Primary-key column '{}' missing from chunk", column))?;
        match last_row.get(index) {
            Some(Value::Null) | None => {
                return Err(format!("Primary-key column '{}' is NULL in the last row", column))
            }
            Some(value) => key.push(value.clone()),
        }
    }
    Ok(Some(key))
}

#[cfg(test)]
mod tests;
