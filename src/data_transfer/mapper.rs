use crate::data_transfer::coercer::is_temporal_column_name;
use crate::db_types::{ColumnDescriptor, SourceEngine, TableDescriptor};
use serde::{Deserialize, Serialize};

/// ClickHouse caps decimal precision at 76 digits.
const MAX_DECIMAL_PRECISION: u32 = 76;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    fn bits(&self) -> u8 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

/// Closed set of destination column types.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationType {
    String,
    Integer { width: IntWidth, unsigned: bool },
    Float { double: bool },
    Decimal { precision: u32, scale: u32 },
    DateTime,
    Boolean,
}

impl DestinationType {
    /// ClickHouse type without the `Nullable(...)` wrapper.
    pub fn clickhouse_base_type(&self) -> String {
        match self {
            DestinationType::String => "String".to_string(),
            DestinationType::Integer { width, unsigned } => {
                let prefix = if *unsigned { "UInt" } else { "Int" };
                format!("{}{}", prefix, width.bits())
            }
            DestinationType::Float { double } => {
                if *double {
                    "Float64".to_string()
                } else {
                    "Float32".to_string()
                }
            }
            DestinationType::Decimal { precision, scale } => {
                format!("Decimal({}, {})", precision, scale)
            }
            DestinationType::DateTime => "DateTime".to_string(),
            DestinationType::Boolean => "Bool".to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DestinationType::Integer { .. }
                | DestinationType::Float { .. }
                | DestinationType::Decimal { .. }
                | DestinationType::Boolean
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoercionRule {
    #[default]
    None,
    Datetime,
    NumericNullSafe,
    /// Not nullable: unreadable values load as the type's default.
    NumericDefault,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappedColumn {
    pub source: ColumnDescriptor,
    pub destination_type: DestinationType,
    pub nullable: bool,
    pub coercion_rule: CoercionRule,
}

impl MappedColumn {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn clickhouse_type(&self) -> String {
        let base = self.destination_type.clickhouse_base_type();
        if self.nullable {
            format!("Nullable({})", base)
        } else {
            base
        }
    }
}

/// Splits `decimal(10,2) unsigned` into (`decimal`, [10, 2], `unsigned`).
fn parse_native_type(native: &str) -> (String, Vec<u32>, String) {
    let lowered = native.trim().to_ascii_lowercase();
    match (lowered.find('('), lowered.find(')')) {
        (Some(open), Some(close)) if close > open => {
            let base = lowered[..open].trim().to_string();
            let args = lowered[open + 1..close]
                .split(',')
                .filter_map(|part| part.trim().parse::<u32>().ok())
                .collect();
            let modifiers = lowered[close + 1..].trim().to_string();
            (base, args, modifiers)
        }
        _ => {
            let mut words = lowered.split_whitespace().collect::<Vec<_>>();
            let mut modifiers = Vec::new();
            while let Some(last) = words.last() {
                if matches!(*last, "unsigned" | "signed" | "zerofill") {
                    modifiers.insert(0, words.pop().unwrap_or_default());
                } else {
                    break;
                }
            }
            (words.join(" "), Vec::new(), modifiers.join(" "))
        }
    }
}

fn decimal_type(args: &[u32], default_precision: u32) -> Option<DestinationType> {
    let precision = args.first().copied().unwrap_or(default_precision);
    let scale = args.get(1).copied().unwrap_or(0);
    if precision == 0 || precision > MAX_DECIMAL_PRECISION || scale > precision {
        return None;
    }
    Some(DestinationType::Decimal { precision, scale })
}

fn map_mysql_type(base: &str, args: &[u32], unsigned: bool) -> Option<DestinationType> {
    let integer = |width| Some(DestinationType::Integer { width, unsigned });
    match base {
        "tinyint" if args.first() == Some(&1) => Some(DestinationType::Boolean),
        "bool" | "boolean" => Some(DestinationType::Boolean),
        "bit" if args.first().copied().unwrap_or(1) == 1 => Some(DestinationType::Boolean),
        "tinyint" => integer(IntWidth::W8),
        "smallint" => integer(IntWidth::W16),
        "mediumint" | "int" | "integer" => integer(IntWidth::W32),
        "bigint" => integer(IntWidth::W64),
        "year" => Some(DestinationType::Integer {
            width: IntWidth::W16,
            unsigned: true,
        }),
        "float" => Some(DestinationType::Float { double: false }),
        "double" | "double precision" | "real" => Some(DestinationType::Float { double: true }),
        "decimal" | "numeric" | "dec" | "fixed" => decimal_type(args, 10),
        "date" | "datetime" | "timestamp" => Some(DestinationType::DateTime),
        _ => None,
    }
}

fn map_postgres_type(base: &str, args: &[u32]) -> Option<DestinationType> {
    let integer = |width| {
        Some(DestinationType::Integer {
            width,
            unsigned: false,
        })
    };
    match base {
        "boolean" | "bool" => Some(DestinationType::Boolean),
        "smallint" | "int2" | "smallserial" | "serial2" => integer(IntWidth::W16),
        "integer" | "int" | "int4" | "serial" | "serial4" => integer(IntWidth::W32),
        "bigint" | "int8" | "bigserial" | "serial8" => integer(IntWidth::W64),
        "real" | "float4" => Some(DestinationType::Float { double: false }),
        "double precision" | "float8" | "float" => Some(DestinationType::Float { double: true }),
        // Unconstrained numeric has no fixed scale; keep it lossless as text.
        "numeric" | "decimal" if args.is_empty() => None,
        "numeric" | "decimal" => decimal_type(args, 0),
        "date"
        | "timestamp"
        | "timestamp without time zone"
        | "timestamp with time zone"
        | "timestamptz" => Some(DestinationType::DateTime),
        _ => None,
    }
}

/// Maps a catalog type to a destination type and coercion rule. Unknown types
/// fall back to `String` instead of failing.
pub fn map_type(
    engine: SourceEngine,
    native_type: &str,
    nullable: bool,
) -> (DestinationType, CoercionRule) {
    let (base, args, modifiers) = parse_native_type(native_type);
    let mapped = match engine {
        SourceEngine::MySQL | SourceEngine::MariaDB => {
            map_mysql_type(&base, &args, modifiers.contains("unsigned"))
        }
        SourceEngine::Postgres => map_postgres_type(&base, &args),
    };

    let destination_type = mapped.unwrap_or(DestinationType::String);
    let rule = match destination_type {
        DestinationType::DateTime => CoercionRule::Datetime,
        ty if ty.is_numeric() && nullable => CoercionRule::NumericNullSafe,
        ty if ty.is_numeric() => CoercionRule::NumericDefault,
        _ => CoercionRule::None,
    };
    (destination_type, rule)
}

/// Maps one reflected column, deciding the nullable wrapper as well.
///
/// Temporal columns are always nullable so out-of-range values can become NULL;
/// name-matched string columns are nullable for the same reason. Primary-key
/// columns are never wrapped since they form the ClickHouse sorting key.
pub fn map_column(engine: SourceEngine, column: &ColumnDescriptor) -> MappedColumn {
    let (destination_type, coercion_rule) = map_type(engine, &column.native_type, column.nullable);
    let nullable = if column.is_primary_key {
        false
    } else {
        column.nullable
            || destination_type == DestinationType::DateTime
            || (destination_type == DestinationType::String && is_temporal_column_name(&column.name))
    };

    MappedColumn {
        source: column.clone(),
        destination_type,
        nullable,
        coercion_rule,
    }
}

pub fn map_table(table: &TableDescriptor) -> Vec<MappedColumn> {
    table
        .columns
        .iter()
        .map(|column| map_column(table.engine, column))
        .collect()
}
