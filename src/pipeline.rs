use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One outbound record: opaque structured content plus a timestamp.
///
/// Selectors read fields from `content` to pick the destination; the codec
/// turns the whole record into a payload. Immutable once part of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub content: Value,
}

impl Record {
    pub fn new(content: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            content,
        }
    }

    pub fn with_timestamp(content: Value, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, content }
    }
}

/// A batch of records submitted by the calling pipeline.
///
/// Exactly one of `ack` or `retry` is invoked once per batch, after every
/// record's outcome has been accounted. `retry` receives the subset of
/// records that failed with a retry-eligible classification; the rest of
/// the batch is implicitly acknowledged.
pub trait Batch: Send + Sync {
    fn events(&self) -> &[Record];
    fn ack(&self);
    fn retry(&self, failed: Vec<Record>);
}

/// Observer hooks for external metrics collection.
///
/// All methods default to no-ops so implementors only override the counters
/// they care about.
pub trait Observer: Send + Sync {
    /// A batch of `count` records has entered the dispatcher.
    fn batch_started(&self, count: usize) {
        let _ = count;
    }

    /// `count` records were dropped (routing/encoding failure or a
    /// drop-only transport rejection).
    fn dropped(&self, count: usize) {
        let _ = count;
    }

    /// `count` records were delivered and acknowledged.
    fn acked(&self, count: usize) {
        let _ = count;
    }

    /// `count` records failed and were returned for retry.
    fn failed(&self, count: usize) {
        let _ = count;
    }
}

/// An [`Observer`] that ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
