// telemetry2store-core - Platform-agnostic event logic
//
// Pure processing for telemetry events: raw message bytes → typed event,
// typed event → relational row, batch of events → Arrow archive batch.
// No I/O, no async, no runtime dependencies.

mod error;
pub mod event;
pub mod normalize;
pub mod schema;

pub use error::{DecodeError, ValidationError};
pub use event::{field_names, TelemetryEvent};
pub use normalize::{parse_timestamp, TelemetryRow};
pub use schema::{archive_schema, events_to_record_batch};
