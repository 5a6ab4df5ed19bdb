use super::*;

#[test]
fn test_from_driver_classifies_transient_messages() {
    let err = LoadError::from_driver("insert chunk", "error sending request: connection reset by peer");
    assert!(err.is_retryable());

    let err = LoadError::from_driver("insert chunk", "Code: 62. DB::Exception: Syntax error");
    assert!(!err.is_retryable());
    assert_eq!(err.scope(), ErrorScope::Table);
}

#[test]
fn test_scope_per_variant() {
    assert_eq!(LoadError::Config("bad".into()).scope(), ErrorScope::Run);
    assert_eq!(LoadError::NoSources.scope(), ErrorScope::Run);
    assert_eq!(
        LoadError::source_unavailable("erp", "auth failed").scope(),
        ErrorScope::Source
    );
    assert_eq!(
        LoadError::DestinationUnavailable("down".into()).scope(),
        ErrorScope::Table
    );
    assert_eq!(LoadError::timeout("fetch chunk", 5).scope(), ErrorScope::Retryable);
}

#[test]
fn test_display_includes_context() {
    let err = LoadError::schema_sync("src__erp__shop__orders", "DDL rejected");
    assert_eq!(
        err.to_string(),
        "Schema sync failed for table src__erp__shop__orders: DDL rejected"
    );
}
