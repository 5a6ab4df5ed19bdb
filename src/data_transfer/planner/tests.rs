use super::*;
use crate::db_types::ColumnDescriptor;
use serde_json::json;

fn descriptor(engine: SourceEngine, schema: &str, table: &str) -> TableDescriptor {
    TableDescriptor {
        source_name: "crm-eu".into(),
        engine,
        database: "sales".into(),
        schema: schema.into(),
        table: table.into(),
        columns: vec![ColumnDescriptor {
            name: "id".into(),
            native_type: "int".into(),
            nullable: false,
            is_primary_key: true,
            ordinal_position: 1,
        }],
        primary_key: vec!["id".into()],
    }
}

fn request(primary_key: Vec<&str>, after_key: Option<Vec<Value>>) -> ChunkRequest {
    ChunkRequest {
        schema: "sales".into(),
        table: "orders".into(),
        columns: vec!["id".into(), "total".into()],
        primary_key: primary_key.into_iter().map(String::from).collect(),
        after_key,
        offset: 0,
        limit: 500,
    }
}

#[test]
fn test_destination_table_name() {
    let mysql = descriptor(SourceEngine::MySQL, "sales", "orders");
    assert_eq!(destination_table_name(&mysql), "src__crm_eu__sales__orders");

    let public = descriptor(SourceEngine::Postgres, "public", "orders");
    assert_eq!(destination_table_name(&public), "src__crm_eu__sales__orders");

    let billing = descriptor(SourceEngine::Postgres, "billing", "orders");
    assert_eq!(destination_table_name(&billing), "src__crm_eu__sales__billing_orders");
}

#[test]
fn test_plan_table_maps_columns() {
    let plan = plan_table(descriptor(SourceEngine::MySQL, "sales", "orders"));
    assert_eq!(plan.column_names(), vec!["id"]);
    assert_eq!(plan.order_by().to_vec(), vec!["id".to_string()]);
    assert!(!plan.columns[0].nullable);
}

#[test]
fn test_build_chunk_query_first_keyset_page() {
    let sql = build_chunk_query(SourceEngine::MySQL, &request(vec!["id"], None)).unwrap();
    assert_eq!(
        sql,
        "SELECT src.`id`, src.`total` FROM `sales`.`orders` AS src ORDER BY src.`id` LIMIT 500"
    );
}

#[test]
fn test_build_chunk_query_composite_cursor() {
    let sql = build_chunk_query(
        SourceEngine::MySQL,
        &request(vec!["id", "line"], Some(vec![json!("10"), json!("O'Brien")])),
    )
    .unwrap();
    assert!(sql.contains("WHERE (src.`id`, src.`line`) > ('10', 'O''Brien')"));
    assert!(sql.ends_with("ORDER BY src.`id`, src.`line` LIMIT 500"));
}

#[test]
fn test_build_chunk_query_postgres_casts_to_text() {
    let sql = build_chunk_query(SourceEngine::Postgres, &request(vec!["id"], Some(vec![json!(42)])))
        .unwrap();
    assert_eq!(
        sql,
        "SELECT src.\"id\"::text AS \"id\", src.\"total\"::text AS \"total\" FROM \"sales\".\"orders\" AS src WHERE src.\"id\" > 42 ORDER BY src.\"id\" LIMIT 500"
    );
}

#[test]
fn test_build_chunk_query_offset_without_primary_key() {
    let mut req = request(vec![], None);
    req.offset = 1000;
    let sql = build_chunk_query(SourceEngine::MariaDB, &req).unwrap();
    assert_eq!(
        sql,
        "SELECT src.`id`, src.`total` FROM `sales`.`orders` AS src ORDER BY 1, 2 LIMIT 500 OFFSET 1000"
    );
}

#[test]
fn test_offset_pages_share_one_ordering() {
    let mut req = request(vec![], None);
    req.columns = vec!["payload".into()];
    req.limit = 2;
    let first = build_chunk_query(SourceEngine::Postgres, &req).unwrap();
    req.offset = 2;
    let second = build_chunk_query(SourceEngine::Postgres, &req).unwrap();

    assert_eq!(
        second,
        "SELECT src.\"payload\"::text AS \"payload\" FROM \"sales\".\"orders\" AS src ORDER BY 1 LIMIT 2 OFFSET 2"
    );
    assert!(first.contains(" ORDER BY 1 LIMIT 2 OFFSET 0"));
}

#[test]
fn test_destination_prefix_isolates_sanitized_sources() {
    assert_eq!(destination_prefix("crm-1", "sales"), "src__crm_1__sales__");
    assert_eq!(destination_prefix("crm-1", "sales"), destination_prefix("crm_1", "sales"));
    assert!(destination_table_name(&descriptor(SourceEngine::MySQL, "sales", "orders"))
        .starts_with(&destination_prefix("crm-eu", "sales")));
}

#[test]
fn test_colliding_plans_are_split_out() {
    let plans = vec![
        plan_table(descriptor(SourceEngine::MySQL, "sales", "order-items")),
        plan_table(descriptor(SourceEngine::MySQL, "sales", "order_items")),
        plan_table(descriptor(SourceEngine::MySQL, "sales", "orders")),
    ];

    let (unique, colliding) = partition_colliding_plans(plans);

    assert_eq!(
        unique.iter().map(|p| p.table.table.as_str()).collect::<Vec<_>>(),
        vec!["order-items", "orders"]
    );
    assert_eq!(colliding.len(), 1);
    assert_eq!(colliding[0].0.table.table, "order_items");
    assert!(colliding[0].1.contains("crm-eu.sales.order-items"));
}

#[test]
fn test_null_cursor_is_rejected() {
    assert!(quote_source_literal(SourceEngine::MySQL, &Value::Null).is_err());

    let chunk = DataChunk::new(
        vec!["id".into(), "total".into()],
        vec![vec![json!("1"), json!("5")], vec![Value::Null, json!("6")]],
    );
    assert!(last_key_of_chunk(&chunk, &["id".to_string()]).is_err());
}

#[test]
fn test_last_key_of_chunk() {
    let chunk = DataChunk::new(
        vec!["id".into(), "total".into()],
        vec![vec![json!("1"), json!("5")], vec![json!("2"), json!("6")]],
    );
    assert_eq!(
        last_key_of_chunk(&chunk, &["ID".to_string()]).unwrap(),
        Some(vec![json!("2")])
    );
    assert_eq!(last_key_of_chunk(&DataChunk::default(), &["id".to_string()]).unwrap(), None);
}
