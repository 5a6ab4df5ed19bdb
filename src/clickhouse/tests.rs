use super::*;
use crate::data_transfer::mapper::map_column;
use crate::db_types::{ColumnDescriptor, SourceEngine};
use serde_json::json;

fn spec(host: &str) -> DestinationSpec {
    DestinationSpec {
        host: host.to_string(),
        port: 8123,
        username: "default".to_string(),
        password: Some("password".to_string()),
        database: "analytics".to_string(),
        secure: false,
    }
}

fn mapped(name: &str, native_type: &str, nullable: bool, is_primary_key: bool) -> MappedColumn {
    map_column(
        SourceEngine::MySQL,
        &ColumnDescriptor {
            name: name.to_string(),
            native_type: native_type.to_string(),
            nullable,
            is_primary_key,
            ordinal_position: 1,
        },
    )
}

#[test]
fn test_create_client_basic() {
    assert!(create_client(&spec("localhost")).is_ok());
    assert!(create_client(&spec("http://clickhouse.local")).is_ok());
    assert!(create_client(&spec("  ")).is_err());
}

#[test]
fn test_quote_identifier_escapes_backticks() {
    assert_eq!(quote_identifier("orders"), "`orders`");
    assert_eq!(quote_identifier("we`ird"), "`we\\`ird`");
}

#[test]
fn test_build_create_table_sql() {
    let columns = vec![
        mapped("id", "bigint(20)", false, true),
        mapped("created_at", "datetime", false, false),
        mapped("note", "text", true, false),
    ];

    let sql = build_create_table_sql(
        "analytics",
        "src__crm__app__orders",
        &columns,
        &["id".to_string()],
    );

    assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `analytics`.`src__crm__app__orders` ("));
    assert!(sql.contains("`id` Int64,"));
    assert!(sql.contains("`created_at` Nullable(DateTime),"));
    assert!(sql.contains("`note` Nullable(String)"));
    assert!(sql.ends_with(
        "ENGINE = MergeTree ORDER BY (`id`) SETTINGS non_replicated_deduplication_window = 100"
    ));
}

#[test]
fn test_build_create_table_sql_without_primary_key() {
    let columns = vec![mapped("payload", "text", true, false)];
    let sql = build_create_table_sql("analytics", "events", &columns, &[]);
    assert!(sql.contains("ORDER BY tuple() SETTINGS"));
}

#[test]
fn test_build_add_columns_sql() {
    let columns = vec![
        mapped("score", "int(11)", true, false),
        mapped("label", "varchar(10)", false, false),
    ];
    let sql = build_add_columns_sql("analytics", "events", &columns);
    assert_eq!(
        sql,
        "ALTER TABLE `analytics`.`events` ADD COLUMN IF NOT EXISTS `score` Nullable(Int32), ADD COLUMN IF NOT EXISTS `label` String"
    );
}

#[test]
fn test_build_insert_body_keeps_column_order() {
    let chunk = DataChunk::new(
        vec!["id".into(), "name".into(), "born".into()],
        vec![
            vec![json!(1), json!("Ana"), json!("1990-01-01")],
            vec![json!(2), Value::Null, Value::Null],
        ],
    );

    let body = build_insert_body(&chunk).unwrap();
    let lines = body.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], r#"{"id":1,"name":"Ana","born":"1990-01-01"}"#);
    assert_eq!(lines[1], r#"{"id":2,"name":null,"born":null}"#);
}

#[test]
fn test_build_insert_body_rejects_ragged_rows() {
    let chunk = DataChunk::new(vec!["id".into(), "name".into()], vec![vec![json!(1)]]);
    assert!(build_insert_body(&chunk).is_err());
}

#[test]
fn test_parse_compact_each_row_skips_types_line() {
    let body = "[\"name\",\"type\"]\n[\"String\",\"String\"]\n[\"id\",\"Int64\"]\n[\"note\",\"Nullable(String)\"]\n";
    let result = parse_compact_each_row(body).unwrap();
    assert_eq!(result.columns, vec!["name", "type"]);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[1][1], json!("Nullable(String)"));
}

#[test]
fn test_insert_settings_carry_dedup_token() {
    let settings = insert_settings("src__crm__app__orders:load-1:3");
    assert!(settings.contains(&("input_format_null_as_default", "1")));
    assert!(settings.contains(&("insert_deduplicate", "1")));
    assert!(settings.contains(&("insert_deduplication_token", "src__crm__app__orders:load-1:3")));
}

#[test]
fn test_credentials_are_sent_as_headers() {
    let spec = spec("localhost");
    let headers = auth_headers(&spec);
    assert_eq!(
        headers,
        vec![
            ("X-ClickHouse-User", "default".to_string()),
            ("X-ClickHouse-Key", "password".to_string())
        ]
    );
    assert!(!spec.url().contains("password"));

    let anonymous = DestinationSpec {
        password: None,
        ..spec
    };
    assert_eq!(auth_headers(&anonymous).len(), 1);
}
