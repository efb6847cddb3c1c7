//! Wire-format tests for depchain-core types.

use chrono::Utc;
use depchain_core::buildset::*;
use depchain_core::events::*;
use depchain_core::ids::*;
use depchain_core::pending::BuildRequest;
use depchain_core::properties::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_build_request_minimal_json() {
    let request: BuildRequest = serde_json::from_value(json!({"reason": "commit"})).unwrap();
    assert_eq!(request.reason, "commit");
    assert_eq!(request.external_id, None);
    assert!(request.properties.is_empty());
}

#[test]
fn test_buildset_completed_event_shape() {
    let event = Event::BuildsetCompleted(BuildsetCompletedPayload {
        buildset_id: BuildsetId::new(1),
        source_stamp_id: SourceStampId::new(42),
        result: BuildResult::Warnings,
        completed_at: Utc::now(),
    });

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "buildset_completed");
    assert_eq!(json["buildset_id"], 1);
    assert_eq!(json["source_stamp_id"], 42);
    assert_eq!(json["result"], "warnings");

    let parsed: Event = serde_json::from_value(json).unwrap();
    assert_eq!(parsed.subject(), "buildset.completed.1");
}

#[test]
fn test_buildset_with_properties_is_flat() {
    let mut properties = Properties::new();
    properties.set(SCHEDULER_PROPERTY, "compile", SOURCE_SCHEDULER);

    let entry = BuildsetWithProperties {
        buildset: Buildset {
            id: BuildsetId::new(3),
            source_stamp_id: SourceStampId::new(42),
            reason: "commit".to_string(),
            external_id: None,
            builder: "Build-Compile".to_string(),
            complete: false,
            result: None,
            submitted_at: Utc::now(),
            completed_at: None,
        },
        properties,
    };

    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["id"], 3);
    assert_eq!(json["properties"]["scheduler"]["value"], "compile");
    assert_eq!(json["properties"]["scheduler"]["source"], "Scheduler");
}

#[test]
fn test_unknown_result_rejected() {
    let parsed = serde_json::from_value::<BuildResult>(json!("flaky"));
    assert!(parsed.is_err());
    assert_eq!("failure".parse::<BuildResult>(), Ok(BuildResult::Failure));
}
