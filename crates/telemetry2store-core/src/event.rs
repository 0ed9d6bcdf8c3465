//! Telemetry event model and payload decoding.
//!
//! A [`TelemetryEvent`] carries the fixed known fields exactly as they
//! arrived (strings, before normalization) plus an explicit metadata map for
//! every key outside the known set. Typing happens here, on ingress, so no
//! untyped mapping travels further into the pipeline.

use serde_json::{Map, Value};

use crate::DecodeError;

/// Field names on the wire and in the relational/archive layouts.
pub mod field_names {
    /// camelCase keys used by event producers.
    pub mod json {
        pub const ID: &str = "id";
        pub const DOMAIN: &str = "domain";
        pub const REASON: &str = "reason";
        pub const SOURCE: &str = "source";
        pub const POLICY_VERSION: &str = "policyVersion";
        pub const RISK_SCORE: &str = "riskScore";
        pub const HASHED_USER_ID: &str = "hashedUserId";
        pub const CLIENT_IP: &str = "clientIp";
        pub const USER_AGENT: &str = "userAgent";
        pub const TIMESTAMP: &str = "timestamp";
    }

    /// snake_case column names shared by the row store and the archive.
    pub mod column {
        pub const ID: &str = "id";
        pub const DOMAIN: &str = "domain";
        pub const REASON: &str = "reason";
        pub const SOURCE: &str = "source";
        pub const POLICY_VERSION: &str = "policy_version";
        pub const RISK_SCORE: &str = "risk_score";
        pub const HASHED_USER_ID: &str = "hashed_user_id";
        pub const CLIENT_IP: &str = "client_ip";
        pub const USER_AGENT: &str = "user_agent";
        pub const TIMESTAMP: &str = "timestamp";
        pub const METADATA: &str = "metadata";
    }
}

/// One decoded telemetry record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryEvent {
    pub id: Option<String>,
    pub domain: Option<String>,
    pub reason: Option<String>,
    pub source: Option<String>,
    pub policy_version: Option<String>,
    /// Kept raw: validated during normalization, archived as-is.
    pub risk_score: Option<Value>,
    pub hashed_user_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Raw ISO-8601 text; parsed during normalization.
    pub timestamp: Option<String>,
    /// Every key outside the known field set, preserved verbatim.
    pub metadata: Map<String, Value>,
}

impl TelemetryEvent {
    /// Decode one message payload holding a JSON object.
    pub fn decode_json(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }
        match serde_json::from_slice::<Value>(payload)? {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(DecodeError::NotAnObject {
                found: json_type_name(&other),
            }),
        }
    }

    /// Decode a stream entry whose field values are each JSON-encoded.
    pub fn decode_fields<I, K, V>(fields: I) -> Result<Self, DecodeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        let mut map = Map::new();
        for (key, raw) in fields {
            let key = key.into();
            let value = serde_json::from_slice::<Value>(raw.as_ref()).map_err(|e| {
                DecodeError::InvalidField {
                    field: key.clone(),
                    reason: e.to_string(),
                }
            })?;
            map.insert(key, value);
        }
        if map.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }
        Ok(Self::from_map(map))
    }

    /// Split a JSON object into the known fields and the metadata remainder.
    pub fn from_map(map: Map<String, Value>) -> Self {
        use field_names::json;

        let mut event = Self::default();
        for (key, value) in map {
            match key.as_str() {
                json::ID => event.id = scalar_text(value),
                json::DOMAIN => event.domain = scalar_text(value),
                json::REASON => event.reason = scalar_text(value),
                json::SOURCE => event.source = scalar_text(value),
                json::POLICY_VERSION => event.policy_version = scalar_text(value),
                json::RISK_SCORE => {
                    event.risk_score = match value {
                        Value::Null => None,
                        v => Some(v),
                    }
                }
                json::HASHED_USER_ID => event.hashed_user_id = scalar_text(value),
                json::CLIENT_IP => event.client_ip = scalar_text(value),
                json::USER_AGENT => event.user_agent = scalar_text(value),
                json::TIMESTAMP => event.timestamp = scalar_text(value),
                _ => {
                    event.metadata.insert(key, value);
                }
            }
        }
        event
    }

    /// Metadata map rendered as JSON text for the archive column.
    pub fn metadata_json(&self) -> String {
        // Serializing a Map<String, Value> cannot fail.
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Known string fields accept any scalar; non-strings keep their JSON text.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
