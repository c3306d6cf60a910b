use common::{
    init_structured_logging, LoggingConfig, OperationTimer, RequestContext, StructuredLogEntry,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[test]
fn test_structured_log_entry_creation() {
    let mut fields = HashMap::new();
    fields.insert("key".to_string(), Value::String("cache_hit".to_string()));

    let entry = StructuredLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: "INFO".to_string(),
        target: "orchestrator::cache".to_string(),
        message: "Image cache hit".to_string(),
        fields,
        request_id: Some("req-123".to_string()),
        duration_ms: Some(3),
    };

    assert_eq!(entry.level, "INFO");
    assert_eq!(entry.message, "Image cache hit");
    assert!(entry.fields.contains_key("key"));

    let json = serde_json::to_string(&entry).expect("serializes");
    let parsed: StructuredLogEntry = serde_json::from_str(&json).expect("parses back");
    assert_eq!(parsed.request_id.as_deref(), Some("req-123"));
}

#[test]
fn test_operation_timer_reports_duration() {
    let timer = OperationTimer::new("remote_call");
    std::thread::sleep(Duration::from_millis(10));
    assert!(timer.elapsed_ms() >= 10);

    let failed: Result<(), String> = Err("timeout".to_string());
    let duration = timer.finish_with_result(&failed);
    assert!(duration >= 10);
}

#[test]
fn test_request_context_ids_are_unique() {
    let a = RequestContext::new();
    let b = RequestContext::default();
    assert_ne!(a.request_id, b.request_id);
    assert_eq!(a.child("text"), format!("{}/text", a.request_id));
}

#[test]
fn test_second_initialization_fails_gracefully() {
    let first = init_structured_logging(LoggingConfig::production());
    let second = init_structured_logging(LoggingConfig::default());

    // Only one global subscriber can exist per process
    assert!(first.is_ok());
    assert!(second.is_err());
}
