// Integration tests for telemetry2store-core
//
// Raw message bytes through decoding, normalization and the archive layout.

use arrow::array::{Array, Float64Array, StringArray};
use telemetry2store_core::{
    archive_schema, events_to_record_batch, DecodeError, TelemetryEvent, ValidationError,
};

fn strings<'a>(batch: &'a arrow::array::RecordBatch, name: &str) -> &'a StringArray {
    batch
        .column_by_name(name)
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
}

#[test]
fn queue_payload_to_row_and_archive() {
    let payload = br#"{
        "id": "evt-1",
        "domain": "payments",
        "reason": "velocity",
        "source": "edge",
        "policyVersion": "2024.05",
        "riskScore": 0.82,
        "hashedUserId": "u-9f2",
        "clientIp": "10.0.0.7",
        "userAgent": "curl/8.4",
        "timestamp": "2024-05-01T12:00:00+02:00",
        "region": "eu-west-1"
    }"#;

    let event = TelemetryEvent::decode_json(payload).unwrap();
    let row = event.normalize().unwrap();
    assert_eq!(row.id, "evt-1");
    assert_eq!(row.policy_version.as_deref(), Some("2024.05"));
    assert_eq!(row.risk_score, 0.82);
    assert_eq!(row.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");

    let batch = events_to_record_batch(&[event]).unwrap();
    assert_eq!(batch.schema(), archive_schema());
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(strings(&batch, "policy_version").value(0), "2024.05");
    // Archived as received, not normalized
    assert_eq!(
        strings(&batch, "timestamp").value(0),
        "2024-05-01T12:00:00+02:00"
    );
    let metadata: serde_json::Value =
        serde_json::from_str(strings(&batch, "metadata").value(0)).unwrap();
    assert_eq!(metadata, serde_json::json!({"region": "eu-west-1"}));
}

#[test]
fn stream_entry_fields_decode_like_queue_payloads() {
    let fields = vec![
        ("id", b"\"evt-2\"".to_vec()),
        ("riskScore", b"0.4".to_vec()),
        ("timestamp", b"\"2024-05-01T12:00:00Z\"".to_vec()),
        ("tags", b"[\"a\",\"b\"]".to_vec()),
    ];
    let from_fields = TelemetryEvent::decode_fields(fields).unwrap();
    let from_json = TelemetryEvent::decode_json(
        br#"{"id":"evt-2","riskScore":0.4,"timestamp":"2024-05-01T12:00:00Z","tags":["a","b"]}"#,
    )
    .unwrap();
    assert_eq!(from_fields, from_json);
}

#[test]
fn malformed_payloads_are_decode_errors() {
    assert!(matches!(
        TelemetryEvent::decode_json(b""),
        Err(DecodeError::EmptyPayload)
    ));
    assert!(matches!(
        TelemetryEvent::decode_json(b"[1,2,3]"),
        Err(DecodeError::NotAnObject { .. })
    ));
    assert!(matches!(
        TelemetryEvent::decode_json(b"{\"id\":"),
        Err(DecodeError::InvalidJson(_))
    ));
    assert!(matches!(
        TelemetryEvent::decode_fields(vec![("id", b"not-json".to_vec())]),
        Err(DecodeError::InvalidField { .. })
    ));
}

#[test]
fn invalid_events_are_archived_but_not_normalized() {
    let events = vec![
        TelemetryEvent::decode_json(br#"{"id":"ok","timestamp":"2024-05-01T12:00:00Z"}"#)
            .unwrap(),
        TelemetryEvent::decode_json(br#"{"id":"bad","riskScore":"high","timestamp":"2024-05-01T12:00:00Z"}"#)
            .unwrap(),
        TelemetryEvent::decode_json(br#"{"riskScore":0.1}"#).unwrap(),
    ];

    assert_eq!(events[0].normalize().unwrap().risk_score, 0.0);
    assert!(matches!(
        events[1].normalize(),
        Err(ValidationError::InvalidRiskScore { .. })
    ));
    assert!(matches!(
        events[2].normalize(),
        Err(ValidationError::MissingId)
    ));

    let batch = events_to_record_batch(&events).unwrap();
    assert_eq!(batch.num_rows(), 3);

    let scores = batch
        .column_by_name("risk_score")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(scores.value(0), 0.0);
    assert!(scores.is_null(1));
    assert_eq!(scores.value(2), 0.1);

    let metadata: serde_json::Value =
        serde_json::from_str(strings(&batch, "metadata").value(1)).unwrap();
    assert_eq!(metadata["riskScore"], "high");
    assert!(strings(&batch, "id").is_null(2));
}
