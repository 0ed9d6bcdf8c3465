// Arrow schema for archived telemetry batches
//
// Archive rows mirror the raw event, not the normalized row: the timestamp
// stays as received so records that failed normalization are still archived
// intact. Unmapped keys are folded into a JSON-encoded metadata column.

use arrow::array::{ArrayRef, Float64Builder, RecordBatch, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use std::sync::{Arc, OnceLock};

use crate::event::field_names::column;
use crate::normalize::risk_score_value;
use crate::TelemetryEvent;

/// Returns a cached `Arc<Schema>` for archive files.
pub fn archive_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(|| Arc::new(build_schema())))
}

fn build_schema() -> Schema {
    Schema::new(vec![
        Field::new(column::ID, DataType::Utf8, true),
        Field::new(column::DOMAIN, DataType::Utf8, true),
        Field::new(column::REASON, DataType::Utf8, true),
        Field::new(column::SOURCE, DataType::Utf8, true),
        Field::new(column::POLICY_VERSION, DataType::Utf8, true),
        // Null only when the producer sent a non-numeric value (kept in metadata)
        Field::new(column::RISK_SCORE, DataType::Float64, true),
        Field::new(column::HASHED_USER_ID, DataType::Utf8, true),
        Field::new(column::CLIENT_IP, DataType::Utf8, true),
        Field::new(column::USER_AGENT, DataType::Utf8, true),
        Field::new(column::TIMESTAMP, DataType::Utf8, true),
        Field::new(column::METADATA, DataType::Utf8, false),
    ])
}

/// Convert events, in arrival order, into one Arrow `RecordBatch`.
pub fn events_to_record_batch(events: &[TelemetryEvent]) -> Result<RecordBatch, ArrowError> {
    let mut risk_scores = Float64Builder::with_capacity(events.len());
    let mut metadata = StringBuilder::with_capacity(events.len(), events.len() * 16);

    for event in events {
        let score = risk_score_value(event.risk_score.as_ref());
        risk_scores.append_option(score);
        if score.is_none() {
            // Preserve the rejected raw value next to the other extras.
            let mut extras = event.metadata.clone();
            if let Some(raw) = &event.risk_score {
                extras.insert(
                    crate::event::field_names::json::RISK_SCORE.to_string(),
                    raw.clone(),
                );
            }
            metadata.append_value(
                serde_json::to_string(&extras).unwrap_or_else(|_| "{}".to_string()),
            );
        } else {
            metadata.append_value(event.metadata_json());
        }
    }

    let columns: Vec<ArrayRef> = vec![
        string_column(events, |e| e.id.as_deref()),
        string_column(events, |e| e.domain.as_deref()),
        string_column(events, |e| e.reason.as_deref()),
        string_column(events, |e| e.source.as_deref()),
        string_column(events, |e| e.policy_version.as_deref()),
        Arc::new(risk_scores.finish()),
        string_column(events, |e| e.hashed_user_id.as_deref()),
        string_column(events, |e| e.client_ip.as_deref()),
        string_column(events, |e| e.user_agent.as_deref()),
        string_column(events, |e| e.timestamp.as_deref()),
        Arc::new(metadata.finish()),
    ];

    RecordBatch::try_new(archive_schema(), columns)
}

fn string_column<F>(events: &[TelemetryEvent], field: F) -> ArrayRef
where
    F: Fn(&TelemetryEvent) -> Option<&str>,
{
    Arc::new(events.iter().map(field).collect::<StringArray>())
}
