use crate::config::LoadOptions;
use crate::data_transfer::coercer::{coerce, merge_stats, QualityGates};
use crate::data_transfer::models::{TableStatus, TransferResult};
use crate::data_transfer::planner::{last_key_of_chunk, TablePlan};
use crate::data_transfer::retry::with_timeout;
use crate::data_transfer::schema_sync::synchronize;
use crate::data_transfer::sink::{ChunkRequest, DestinationSink, SourceReader};
use crate::db_types::DataChunk;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Collapses rows sharing a primary key inside one chunk. The last row seen
/// for a key wins and takes the slot of the first occurrence.
pub fn dedup_by_primary_key(chunk: DataChunk, primary_key: &[String]) -> (DataChunk, u64) {
    if primary_key.is_empty() || chunk.rows.len() < 2 {
        return (chunk, 0);
    }
    let indices = primary_key
        .iter()
        .filter_map(|key| chunk.column_index(key))
        .collect::<Vec<_>>();
    if indices.len() != primary_key.len() {
        return (chunk, 0);
    }

    let DataChunk { columns, rows } = chunk;
    let total = rows.len();
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(total);
    let mut kept: Vec<Vec<Value>> = Vec::with_capacity(total);

    for row in rows {
        let key_values = indices
            .iter()
            .map(|i| row.get(*i).cloned().unwrap_or(Value::Null))
            .collect::<Vec<_>>();
        let key = serde_json::to_string(&key_values).unwrap_or_default();
        match slots.get(&key) {
            Some(slot) => kept[*slot] = row,
            None => {
                slots.insert(key, kept.len());
                kept.push(row);
            }
        }
    }

    let skipped = (total - kept.len()) as u64;
    (DataChunk::new(columns, kept), skipped)
}

/// Token ClickHouse uses to drop a block it has already stored, so a retried
/// insert whose first attempt committed does not load the chunk twice.
/// Stable across retries of one chunk and unique across loads.
pub fn insert_token(load_id: &str, destination_table: &str, sequence: u64) -> String {
    format!("{}:{}:{}", destination_table, load_id, sequence)
}

fn cursor_advanced(previous: Option<&Vec<Value>>, next: &[Value]) -> bool {
    previous.map(|prev| prev.as_slice() != next).unwrap_or(true)
}

/// Moves one table end to end: schema sync, optional truncate, then chunked
/// fetch/coerce/dedup/insert until the source is exhausted or a chunk fails.
///
/// Never returns an error; every failure lands in the returned result so one
/// table cannot take down its siblings.
pub async fn transfer_table(
    source: &dyn SourceReader,
    destination: &dyn DestinationSink,
    plan: &TablePlan,
    options: &LoadOptions,
) -> TransferResult {
    let started = Instant::now();
    let table = &plan.table;
    let mut result = TransferResult::new(&table.source_name, &table.table, &plan.destination_table);

    log::info!("Syncing schema for {} -> {}", table.display_name(), plan.destination_table);
    let report = match synchronize(
        destination,
        &plan.destination_table,
        &plan.columns,
        plan.order_by(),
        options,
    )
    .await
    {
        Ok(report) => report,
        Err(err) => {
            log::error!("Schema sync failed for {}: {}", table.display_name(), err);
            result.record_failure(err.to_string());
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }
    };
    result.warnings.extend(report.warnings.iter().cloned());
    let skipped_columns = report.skipped_columns.clone();
    result.schema = Some(report);

    if options.truncate_before_load {
        let truncated = options
            .retry
            .run("truncate destination table", || {
                with_timeout(
                    "truncate destination table",
                    options.timeouts.insert(),
                    destination.truncate(&plan.destination_table),
                )
            })
            .await;
        if let Err(err) = truncated {
            log::error!("Truncate failed for {}: {}", plan.destination_table, err);
            result.record_failure(err.to_string());
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }
    }

    let chunk_size = options.chunk_size.max(1);
    let mut request = ChunkRequest {
        schema: table.schema.clone(),
        table: table.table.clone(),
        columns: plan.column_names(),
        primary_key: table.primary_key.clone(),
        after_key: None,
        offset: 0,
        limit: chunk_size,
    };

    log::info!(
        "Streaming {} in chunks of {} ({} paging)",
        table.display_name(),
        chunk_size,
        if request.uses_keyset() { "keyset" } else { "offset" }
    );

    let load_id = Uuid::new_v4().to_string();
    let mut gates = QualityGates::new();
    let mut sequence = 0u64;

    loop {
        let fetched = options
            .retry
            .run("fetch chunk", || {
                with_timeout("fetch chunk", options.timeouts.fetch(), source.fetch_chunk(&request))
            })
            .await;
        let chunk = match fetched {
            Ok(chunk) => chunk,
            Err(err) => {
                log::error!("Fetch failed for {}: {}", table.display_name(), err);
                result.record_failure(err.to_string());
                break;
            }
        };
        if chunk.is_empty() {
            break;
        }

        let fetched_rows = chunk.len();
        sequence += 1;
        result.rows_attempted += fetched_rows as u64;

        let next_key = if request.uses_keyset() {
            match last_key_of_chunk(&chunk, &request.primary_key) {
                Ok(key) => key,
                Err(err) => {
                    result.record_failure(err);
                    break;
                }
            }
        } else {
            None
        };

        let outcome = coerce(chunk, &plan.columns, &options.coercion, &mut gates);
        merge_stats(&mut result.coercion, &outcome.stats);
        let (deduped, skipped) = dedup_by_primary_key(outcome.chunk, &request.primary_key);
        result.rows_skipped += skipped;
        let insertable = deduped.without_columns(&skipped_columns);
        let token = insert_token(&load_id, &plan.destination_table, sequence);

        let inserted = options
            .retry
            .run("insert chunk", || {
                with_timeout(
                    "insert chunk",
                    options.timeouts.insert(),
                    destination.insert_rows(&plan.destination_table, &insertable, &token),
                )
            })
            .await;
        match inserted {
            Ok(count) => {
                result.rows_inserted += count;
                result.chunks += 1;
                log::debug!(
                    "{}: chunk {} inserted {} row(s), {} deduplicated",
                    table.display_name(),
                    result.chunks,
                    count,
                    skipped
                );
            }
            Err(err) => {
                log::error!("Insert failed for {}: {}", plan.destination_table, err);
                result.record_failure(err.to_string());
                break;
            }
        }

        if fetched_rows < chunk_size {
            break;
        }

        match next_key {
            Some(key) => {
                if !cursor_advanced(request.after_key.as_ref(), &key) {
                    result.record_failure(format!(
                        "Primary key [{}] did not advance; keyset paging requires unique ordered keys",
                        request.primary_key.join(", ")
                    ));
                    break;
                }
                request.after_key = Some(key);
            }
            None => request.offset += fetched_rows as u64,
        }
    }

    if result.errors.is_empty() {
        result.status = TableStatus::Success;
    }
    result.duration_ms = started.elapsed().as_millis() as u64;

    log::info!(
        "{} finished as {:?}: {} attempted, {} inserted, {} deduplicated",
        table.display_name(),
        result.status,
        result.rows_attempted,
        result.rows_inserted,
        result.rows_skipped
    );
    result
}
