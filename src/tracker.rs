//! Per-batch completion accounting.
//!
//! A [`CompletionTracker`] is created for every published batch and shared
//! (via `Arc`) by all of that batch's outbound messages. Success and error
//! listeners on many connections decrement it concurrently and out of order;
//! the decrement that reaches zero finalizes the batch exactly once, either
//! acknowledging it wholesale or handing the retry-eligible subset back to
//! the caller.

use crate::error::PublishError;
use crate::message::OutboundMessage;
use crate::pipeline::{Batch, Observer, Record};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

pub struct CompletionTracker {
    total: usize,
    outstanding: AtomicI64,
    state: Mutex<TrackerState>,
    observer: Arc<dyn Observer>,
}

struct TrackerState {
    failed: Vec<Record>,
    first_error: Option<PublishError>,
    batch: Option<Box<dyn Batch>>,
}

impl CompletionTracker {
    pub(crate) fn new(batch: Box<dyn Batch>, observer: Arc<dyn Observer>) -> Arc<Self> {
        let total = batch.events().len();
        Arc::new(Self {
            total,
            outstanding: AtomicI64::new(total as i64),
            state: Mutex::new(TrackerState {
                failed: Vec::new(),
                first_error: None,
                batch: Some(batch),
            }),
            observer,
        })
    }

    /// The message was delivered and acknowledged by the broker.
    pub(crate) fn done(&self, msg: OutboundMessage) {
        drop(msg);
        self.dec();
    }

    /// The message failed; classify the error and account accordingly.
    ///
    /// Malformed and oversized rejections are drop-only. Queue-full
    /// rejections are retry-eligible but deliberately do not set the batch
    /// error: they signal "there were a lot of other errors", not a failure
    /// of this record. Everything else is retry-eligible and becomes the
    /// batch's reported error only if it is the first one seen.
    pub(crate) fn fail(&self, msg: OutboundMessage, err: PublishError) {
        match err {
            PublishError::Malformed => {
                warn!(topic = %msg.topic, "dropping invalid message");
                self.observer.dropped(1);
            }
            PublishError::TooLarge { size } => {
                warn!(topic = %msg.topic, size, "dropping too large message");
                self.observer.dropped(1);
            }
            PublishError::Overloaded => {
                let mut state = self.lock_state();
                state.failed.push(msg.record);
            }
            PublishError::Transport(_) => {
                let mut state = self.lock_state();
                state.failed.push(msg.record);
                // First error wins: at the end of the batch we report the
                // first error we saw, rather than the last one.
                if state.first_error.is_none() {
                    state.first_error = Some(err);
                }
            }
        }
        self.dec();
    }

    /// A record never made it to a connection (selector, connect or encode
    /// failure). Counts as dropped; the caller logs the cause.
    pub(crate) fn record_dropped(&self) {
        self.observer.dropped(1);
        self.dec();
    }

    fn dec(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) > 1 {
            return;
        }
        self.finalize();
    }

    fn finalize(&self) {
        let (batch, failed, first_error) = {
            let mut state = self.lock_state();
            let Some(batch) = state.batch.take() else {
                return;
            };
            (
                batch,
                std::mem::take(&mut state.failed),
                state.first_error.take(),
            )
        };

        if failed.is_empty() {
            debug!("finished batch");
            batch.ack();
            self.observer.acked(self.total);
            return;
        }

        let failed_count = failed.len();
        let success = self.total - failed_count;
        batch.retry(failed);

        self.observer.failed(failed_count);
        if success > 0 {
            self.observer.acked(success);
        }

        match first_error {
            Some(err) => debug!(error = %err, "batch publish failed"),
            None => debug!("batch publish rejected by transient overload"),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NoopObserver;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct TestBatch {
        events: Vec<Record>,
        acks: Arc<AtomicUsize>,
        retries: Arc<Mutex<Vec<Vec<Record>>>>,
    }

    impl TestBatch {
        fn new(count: usize) -> (Box<Self>, Arc<AtomicUsize>, Arc<Mutex<Vec<Vec<Record>>>>) {
            let acks = Arc::new(AtomicUsize::new(0));
            let retries = Arc::new(Mutex::new(Vec::new()));
            let events = (0..count)
                .map(|i| Record::new(json!({"seq": i})))
                .collect();
            let batch = Box::new(Self {
                events,
                acks: acks.clone(),
                retries: retries.clone(),
            });
            (batch, acks, retries)
        }
    }

    impl Batch for TestBatch {
        fn events(&self) -> &[Record] {
            &self.events
        }

        fn ack(&self) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }

        fn retry(&self, failed: Vec<Record>) {
            self.retries.lock().unwrap().push(failed);
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        dropped: AtomicUsize,
        acked: AtomicUsize,
        failed: AtomicUsize,
    }

    impl Observer for CountingObserver {
        fn dropped(&self, count: usize) {
            self.dropped.fetch_add(count, Ordering::SeqCst);
        }

        fn acked(&self, count: usize) {
            self.acked.fetch_add(count, Ordering::SeqCst);
        }

        fn failed(&self, count: usize) {
            self.failed.fetch_add(count, Ordering::SeqCst);
        }
    }

    fn make_message(tracker: &Arc<CompletionTracker>, seq: usize) -> OutboundMessage {
        let record = Record::new(json!({"seq": seq}));
        OutboundMessage {
            topic: "t".to_string(),
            key: None,
            payload: bytes::Bytes::from_static(b"{}"),
            timestamp: record.timestamp,
            record,
            tracker: tracker.clone(),
        }
    }

    #[test]
    fn test_all_success_acks_once() {
        let (batch, acks, retries) = TestBatch::new(3);
        let observer = Arc::new(CountingObserver::default());
        let tracker = CompletionTracker::new(batch, observer.clone());

        for i in 0..3 {
            let msg = make_message(&tracker, i);
            tracker.done(msg);
        }

        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(retries.lock().unwrap().is_empty());
        assert_eq!(observer.acked.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_drop_only_failures_still_ack_batch() {
        let (batch, acks, retries) = TestBatch::new(2);
        let observer = Arc::new(CountingObserver::default());
        let tracker = CompletionTracker::new(batch, observer.clone());

        let msg = make_message(&tracker, 0);
        tracker.fail(msg, PublishError::Malformed);
        let msg = make_message(&tracker, 1);
        tracker.fail(msg, PublishError::TooLarge { size: 1 << 20 });

        // Dropped records are not retry-eligible, so the batch as a whole
        // is acknowledged.
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(retries.lock().unwrap().is_empty());
        assert_eq!(observer.dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_overload_alone_goes_to_retry_set() {
        let (batch, acks, retries) = TestBatch::new(3);
        let observer = Arc::new(CountingObserver::default());
        let tracker = CompletionTracker::new(batch, observer.clone());

        tracker.record_dropped();
        let msg = make_message(&tracker, 1);
        tracker.done(msg);
        let msg = make_message(&tracker, 2);
        tracker.fail(msg, PublishError::Overloaded);

        assert_eq!(acks.load(Ordering::SeqCst), 0);
        let retried = retries.lock().unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].len(), 1);

        assert_eq!(observer.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(observer.acked.load(Ordering::SeqCst), 2);
        assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mixed_outcomes_account_every_record() {
        let (batch, acks, retries) = TestBatch::new(4);
        let observer = Arc::new(CountingObserver::default());
        let tracker = CompletionTracker::new(batch, observer.clone());

        let msg = make_message(&tracker, 0);
        tracker.done(msg);
        let msg = make_message(&tracker, 1);
        tracker.fail(msg, PublishError::Transport("broker down".to_string()));
        let msg = make_message(&tracker, 2);
        tracker.fail(msg, PublishError::Malformed);
        let msg = make_message(&tracker, 3);
        tracker.fail(msg, PublishError::Overloaded);

        // acked + dropped + retried == batch size
        assert_eq!(acks.load(Ordering::SeqCst), 0);
        assert_eq!(retries.lock().unwrap()[0].len(), 2);
        assert_eq!(observer.acked.load(Ordering::SeqCst), 2);
        assert_eq!(observer.dropped.load(Ordering::SeqCst), 1);
        assert_eq!(observer.failed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_completions_finalize_once() {
        let total = 64;
        let (batch, acks, retries) = TestBatch::new(total);
        let tracker = CompletionTracker::new(batch, Arc::new(NoopObserver));

        let mut handles = Vec::new();
        for i in 0..total {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let msg = make_message(&tracker, i);
                if i % 3 == 0 {
                    tracker.fail(msg, PublishError::Transport(format!("err {}", i)));
                } else {
                    tracker.done(msg);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(acks.load(Ordering::SeqCst), 0);
        assert_eq!(retries.lock().unwrap().len(), 1);
    }
}
