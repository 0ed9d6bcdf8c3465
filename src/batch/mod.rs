// Size-bounded batch accumulation
//
// Events are appended in arrival order and handed out as a `Batch` the
// moment the configured size is reached, so the buffer never holds more than
// `size` events. Decode failures seen while a batch fills are tallied on it
// for the abort-batch policy.

use telemetry2store_core::TelemetryEvent;
use telemetry2store_writer::WriteBatchRequest;

/// A completed batch, ready to flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based flush sequence number within this process
    pub sequence: u64,
    pub events: Vec<TelemetryEvent>,
    pub decode_failures: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn request(&self) -> WriteBatchRequest<'_> {
        WriteBatchRequest {
            events: &self.events,
            decode_failures: self.decode_failures,
        }
    }
}

#[derive(Debug)]
pub struct Batcher {
    size: usize,
    events: Vec<TelemetryEvent>,
    decode_failures: usize,
    completed: u64,
}

impl Batcher {
    /// `size` is clamped to at least 1.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            events: Vec::with_capacity(size.min(64 * 1024)),
            decode_failures: 0,
            completed: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Events waiting in the current batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append one event; returns the full batch once `size` is reached.
    pub fn push(&mut self, event: TelemetryEvent) -> Option<Batch> {
        self.events.push(event);
        if self.events.len() >= self.size {
            Some(self.take())
        } else {
            None
        }
    }

    pub fn record_decode_failure(&mut self) {
        self.decode_failures += 1;
    }

    /// Hand out the partial tail batch, if it holds any events.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.events.is_empty() {
            self.decode_failures = 0;
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> Batch {
        self.completed += 1;
        let events = std::mem::replace(
            &mut self.events,
            Vec::with_capacity(self.size.min(64 * 1024)),
        );
        Batch {
            sequence: self.completed,
            events,
            decode_failures: std::mem::take(&mut self.decode_failures),
        }
    }
}
