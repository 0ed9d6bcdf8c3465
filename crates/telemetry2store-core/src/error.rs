//! Per-record failure kinds.
//!
//! Neither error is fatal: decode failures drop one raw message, validation
//! failures exclude one event from the row store.

use thiserror::Error;

/// A raw message could not be turned into a [`crate::TelemetryEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },

    #[error("field '{field}' is not valid JSON: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("message has no payload")]
    EmptyPayload,
}

/// A decoded event failed normalization into the relational row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("event has no id")]
    MissingId,

    #[error("event '{id}' has no timestamp")]
    MissingTimestamp { id: String },

    #[error("event '{id}' has unparseable timestamp '{value}'")]
    InvalidTimestamp { id: String, value: String },

    #[error("event '{id}' has non-numeric riskScore '{value}'")]
    InvalidRiskScore { id: String, value: String },
}
