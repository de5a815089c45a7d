use crate::pipeline::Record;
use crate::tracker::CompletionTracker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// One record's encoded form in flight to a broker.
///
/// Carries the originating record (returned to the caller if the message
/// lands in the retry set) and a back-reference to its batch's completion
/// tracker. Created at dispatch, consumed exactly once when the outcome is
/// accounted.
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
    pub record: Record,
    pub(crate) tracker: Arc<CompletionTracker>,
}

impl OutboundMessage {
    /// Combined key and payload size, reported with oversized rejections.
    pub fn encoded_size(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.len()) + self.payload.len()
    }
}

impl fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
