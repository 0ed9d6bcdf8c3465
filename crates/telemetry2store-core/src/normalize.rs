//! Normalization of decoded events into the fixed relational row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use crate::{TelemetryEvent, ValidationError};

/// Offset-aware layouts tried after RFC 3339.
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"];

/// Naive layouts; interpreted as UTC.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One row of the `telemetry_events` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub id: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
    pub source: Option<String>,
    pub policy_version: Option<String>,
    pub risk_score: f64,
    pub hashed_user_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRow {
    /// Timestamp as stored in the row store: RFC 3339, UTC, microseconds.
    pub fn timestamp_text(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl TelemetryEvent {
    /// Map this event onto the relational row.
    pub fn normalize(&self) -> Result<TelemetryRow, ValidationError> {
        let id = match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ValidationError::MissingId),
        };

        let risk_score =
            risk_score_value(self.risk_score.as_ref()).ok_or_else(|| {
                ValidationError::InvalidRiskScore {
                    id: id.clone(),
                    value: self
                        .risk_score
                        .as_ref()
                        .map(Value::to_string)
                        .unwrap_or_default(),
                }
            })?;

        let raw_timestamp = self
            .timestamp
            .as_deref()
            .ok_or_else(|| ValidationError::MissingTimestamp { id: id.clone() })?;
        let timestamp =
            parse_timestamp(raw_timestamp).ok_or_else(|| ValidationError::InvalidTimestamp {
                id: id.clone(),
                value: raw_timestamp.to_string(),
            })?;

        Ok(TelemetryRow {
            id,
            domain: self.domain.clone(),
            reason: self.reason.clone(),
            source: self.source.clone(),
            policy_version: self.policy_version.clone(),
            risk_score,
            hashed_user_id: self.hashed_user_id.clone(),
            client_ip: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
            timestamp,
        })
    }
}

/// Resolve a raw riskScore: absent → 0.0, number or numeric string → value,
/// anything else → `None`.
pub(crate) fn risk_score_value(raw: Option<&Value>) -> Option<f64> {
    match raw {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Some(_) => None,
    }
}

/// Parse an ISO-8601 timestamp, optionally suffixed with `Z` or an offset.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let zoned = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(stripped) => format!("{}+00:00", stripped),
        None => trimmed.to_string(),
    };
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&zoned, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
