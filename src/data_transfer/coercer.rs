use crate::config::CoercionSettings;
use crate::data_transfer::mapper::{CoercionRule, DestinationType, MappedColumn};
use crate::db_types::DataChunk;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static TEMPORAL_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(fecha|date|time|created|updated|_at$|^f_?[a-z]{2,4}$|^hr)",
    )
    .expect("temporal name pattern is valid")
});

const NULL_SENTINELS: [&str; 5] = ["null", "\\n", "nan", "none", "n/a"];

/// Why a column was considered for temporal repair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemporalCandidate {
    DeclaredType,
    ColumnName,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColumnCoercionStats {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<TemporalCandidate>,
    pub valid: u64,
    pub nulled: u64,
    pub passed_through: u64,
    /// Set when a name-matched column failed the quality gate.
    pub gated: bool,
}

impl ColumnCoercionStats {
    fn new(column: &str, candidate: Option<TemporalCandidate>) -> Self {
        Self {
            column: column.to_string(),
            candidate,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: &ColumnCoercionStats) {
        self.valid += other.valid;
        self.nulled += other.nulled;
        self.passed_through += other.passed_through;
        self.gated |= other.gated;
        if self.candidate.is_none() {
            self.candidate = other.candidate;
        }
    }
}

/// Quality-gate verdicts for name-matched columns of one table. The first
/// chunk with any present value decides; later chunks follow that verdict.
#[derive(Debug, Clone, Default)]
pub struct QualityGates {
    verdicts: HashMap<String, bool>,
}

impl QualityGates {
    pub fn new() -> Self {
        Self::default()
    }

    fn decide(&mut self, column: &str, valid: u64, invalid: u64, threshold: f64) -> bool {
        if let Some(gated) = self.verdicts.get(column) {
            return *gated;
        }
        if valid + invalid == 0 {
            return false;
        }
        let gated = fails_quality_gate(valid, invalid, threshold);
        self.verdicts.insert(column.to_string(), gated);
        gated
    }
}

#[derive(Debug, Clone)]
pub struct CoercionOutcome {
    pub chunk: DataChunk,
    pub stats: Vec<ColumnCoercionStats>,
}

/// Name-based temporal heuristic, independent of any data.
pub fn is_temporal_column_name(name: &str) -> bool {
    TEMPORAL_NAME_PATTERN.is_match(name.trim())
}

/// Decides whether a column qualifies for temporal repair at all.
pub fn temporal_candidate(column: &MappedColumn) -> Option<TemporalCandidate> {
    if column.coercion_rule == CoercionRule::Datetime {
        return Some(TemporalCandidate::DeclaredType);
    }
    if column.destination_type == DestinationType::String && is_temporal_column_name(column.name()) {
        return Some(TemporalCandidate::ColumnName);
    }
    None
}

/// Statistical gate for name-matched columns: true when too many present
/// values fail the validity test for the column to be treated as temporal.
pub fn fails_quality_gate(valid: u64, invalid: u64, threshold: f64) -> bool {
    let present = valid + invalid;
    if present == 0 {
        return false;
    }
    (invalid as f64 / present as f64) > threshold
}

fn is_absent_text(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || NULL_SENTINELS.contains(&trimmed.to_ascii_lowercase().as_str())
}

fn parse_zoned_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .or_else(|| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z").ok())
        .or_else(|| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z").ok())
        .or_else(|| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%:z").ok())
}

fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M:%S").ok())
}

fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(value, "%Y/%m/%d").ok())
        .or_else(|| NaiveDate::parse_from_str(value, "%d/%m/%Y").ok())
}

fn epoch_value_to_datetime(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let millis = if raw.abs() >= 1_000_000_000_000_f64 {
        raw.round() as i64
    } else {
        (raw * 1000.0).round() as i64
    };
    Utc.timestamp_millis_opt(millis).single()
}

/// Extracts the calendar year of a temporal value, if it parses at all.
pub fn parse_temporal_year(value: &Value, allow_epoch: bool) -> Option<i32> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            parse_zoned_datetime(trimmed)
                .map(|dt| dt.year())
                .or_else(|| parse_naive_datetime(trimmed).map(|dt| dt.year()))
                .or_else(|| parse_naive_date(trimmed).map(|d| d.year()))
        }
        Value::Number(number) if allow_epoch => {
            number.as_f64().and_then(epoch_value_to_datetime).map(|dt| dt.year())
        }
        _ => None,
    }
}

fn is_valid_temporal(value: &Value, allow_epoch: bool, settings: &CoercionSettings) -> bool {
    parse_temporal_year(value, allow_epoch)
        .map(|year| year >= settings.min_year && year <= settings.max_year)
        .unwrap_or(false)
}

fn coerce_temporal_column(
    rows: &mut [Vec<Value>],
    index: usize,
    column: &MappedColumn,
    candidate: TemporalCandidate,
    settings: &CoercionSettings,
    gates: &mut QualityGates,
) -> ColumnCoercionStats {
    let mut stats = ColumnCoercionStats::new(column.name(), Some(candidate));
    let allow_epoch = candidate == TemporalCandidate::DeclaredType;

    // Validity is measured over the whole chunk before anything is touched.
    let mut verdicts = Vec::with_capacity(rows.len());
    let mut invalid = 0u64;
    for row in rows.iter() {
        let verdict = match row.get(index) {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if is_absent_text(raw) => None,
            Some(value) => Some(is_valid_temporal(value, allow_epoch, settings)),
        };
        match verdict {
            Some(true) => stats.valid += 1,
            Some(false) => invalid += 1,
            None => {}
        }
        verdicts.push(verdict);
    }

    let gated = candidate == TemporalCandidate::ColumnName
        && gates.decide(column.name(), stats.valid, invalid, settings.invalid_threshold);

    if gated || !column.nullable {
        log::debug!(
            "Column '{}' left untouched ({}; {} valid, {} invalid)",
            column.name(),
            if gated { "quality gate" } else { "not nullable" },
            stats.valid,
            invalid
        );
        stats.gated = gated;
        stats.valid = 0;
        stats.passed_through = rows.len() as u64;
        return stats;
    }

    for (row, verdict) in rows.iter_mut().zip(verdicts) {
        let Some(slot) = row.get_mut(index) else {
            continue;
        };
        match verdict {
            Some(true) => {}
            Some(false) => {
                *slot = Value::Null;
                stats.nulled += 1;
            }
            None => {
                if slot.is_null() {
                    stats.passed_through += 1;
                } else {
                    // Empty text or a "no value" sentinel.
                    *slot = Value::Null;
                    stats.nulled += 1;
                }
            }
        }
    }

    stats
}

fn parse_boolean_text(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn looks_like_decimal(raw: &str) -> bool {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix(['-', '+']).unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for ch in digits.chars() {
        match ch {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}

/// Converts a value to the JSON shape the destination type expects.
/// `None` means the value cannot represent that type.
fn normalize_numeric_value(value: &Value, destination_type: DestinationType) -> Option<Value> {
    match destination_type {
        DestinationType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::Number(number) => match number.as_f64() {
                Some(v) if v == 0.0 => Some(Value::Bool(false)),
                Some(v) if v == 1.0 => Some(Value::Bool(true)),
                _ => None,
            },
            Value::String(raw) => parse_boolean_text(raw).map(Value::Bool),
            _ => None,
        },
        DestinationType::Integer { unsigned, .. } => {
            let text = match value {
                Value::Number(number) => number.to_string(),
                Value::String(raw) => raw.trim().to_string(),
                Value::Bool(flag) => return Some(Value::from(*flag as u8)),
                _ => return None,
            };
            if unsigned {
                text.parse::<u64>().ok().map(Value::from)
            } else {
                text.parse::<i64>().ok().map(Value::from)
            }
        }
        DestinationType::Float { .. } => {
            let parsed = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(raw) => raw.trim().parse::<f64>().ok(),
                _ => None,
            }?;
            serde_json::Number::from_f64(parsed).map(Value::Number)
        }
        // Decimals travel as text so no precision is lost on the way.
        DestinationType::Decimal { .. } => match value {
            Value::Number(number) => Some(Value::String(number.to_string())),
            Value::String(raw) if looks_like_decimal(raw) => {
                Some(Value::String(raw.trim().to_string()))
            }
            _ => None,
        },
        DestinationType::String | DestinationType::DateTime => Some(value.clone()),
    }
}

/// Values that cannot represent the column's type become null. Non-nullable
/// destination columns then receive the type default on insert; only
/// primary-key values are left as read.
fn normalize_numeric_column(
    rows: &mut [Vec<Value>],
    index: usize,
    column: &MappedColumn,
) -> ColumnCoercionStats {
    let mut stats = ColumnCoercionStats::new(column.name(), None);
    let may_null = !column.source.is_primary_key;

    for row in rows.iter_mut() {
        let Some(slot) = row.get_mut(index) else {
            continue;
        };
        if slot.is_null() {
            stats.passed_through += 1;
            continue;
        }
        let normalized = if matches!(&*slot, Value::String(raw) if is_absent_text(raw)) {
            None
        } else {
            normalize_numeric_value(slot, column.destination_type)
        };
        match normalized {
            Some(value) => {
                *slot = value;
                stats.valid += 1;
            }
            None if may_null => {
                if column.coercion_rule == CoercionRule::NumericDefault {
                    log::debug!(
                        "Column '{}': {} is not a valid {}, loading the type default",
                        column.name(),
                        slot,
                        column.clickhouse_type()
                    );
                }
                *slot = Value::Null;
                stats.nulled += 1;
            }
            None => stats.passed_through += 1,
        }
    }

    stats
}

fn normalize_string_column(
    rows: &mut [Vec<Value>],
    index: usize,
    name: &str,
) -> ColumnCoercionStats {
    let mut stats = ColumnCoercionStats::new(name, None);
    for row in rows.iter_mut() {
        let Some(slot) = row.get_mut(index) else {
            continue;
        };
        let rendered = match &*slot {
            Value::Null | Value::String(_) => None,
            Value::Bool(flag) => Some(flag.to_string()),
            other => Some(other.to_string()),
        };
        if let Some(text) = rendered {
            *slot = Value::String(text);
        }
        stats.passed_through += 1;
    }
    stats
}

/// Repairs one chunk in place of the destination's expectations and reports
/// what happened per column.
pub fn coerce(
    chunk: DataChunk,
    mapped_columns: &[MappedColumn],
    settings: &CoercionSettings,
    gates: &mut QualityGates,
) -> CoercionOutcome {
    let DataChunk { columns, mut rows } = chunk;
    let mut stats = Vec::with_capacity(columns.len());

    for (index, name) in columns.iter().enumerate() {
        let normalized = name.trim().to_ascii_lowercase();
        let mapped = mapped_columns
            .iter()
            .find(|column| column.name().trim().to_ascii_lowercase() == normalized);

        let column_stats = match mapped {
            None => normalize_string_column(&mut rows, index, name),
            Some(column) if column.source.is_primary_key => {
                if column.destination_type.is_numeric() {
                    normalize_numeric_column(&mut rows, index, column)
                } else {
                    let mut passed = ColumnCoercionStats::new(column.name(), None);
                    passed.passed_through = rows.len() as u64;
                    passed
                }
            }
            Some(column) => match temporal_candidate(column) {
                Some(candidate) => {
                    coerce_temporal_column(&mut rows, index, column, candidate, settings, gates)
                }
                None if column.destination_type.is_numeric() => {
                    normalize_numeric_column(&mut rows, index, column)
                }
                None => normalize_string_column(&mut rows, index, column.name()),
            },
        };
        stats.push(column_stats);
    }

    CoercionOutcome {
        chunk: DataChunk { columns, rows },
        stats,
    }
}

/// Folds per-chunk stats into a running per-table total.
pub fn merge_stats(total: &mut Vec<ColumnCoercionStats>, chunk_stats: &[ColumnCoercionStats]) {
    for stats in chunk_stats {
        match total.iter_mut().find(|existing| existing.column == stats.column) {
            Some(existing) => existing.merge(stats),
            None => total.push(stats.clone()),
        }
    }
}
