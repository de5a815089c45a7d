//! An in-memory transport for tests and examples.
//!
//! Delivers scripted outcomes over the same channel model as the real
//! transport, and records connect/close activity so tests can assert on
//! connection lifecycle.

use crate::error::PublishError;
use crate::message::OutboundMessage;
use crate::transport::{Transport, TransportChannels};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// The scripted outcome for one message.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Deliver and report success.
    Success,
    /// Reject with the given classification.
    Fail(PublishError),
}

type OutcomeFn = dyn Fn(&OutboundMessage) -> MockOutcome + Send + Sync;

pub struct MockTransport {
    outcome: Arc<OutcomeFn>,
    fail_connect: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    connected_hosts: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    /// A transport that acknowledges every message.
    pub fn acking() -> Self {
        Self::with_outcome(|_| MockOutcome::Success)
    }

    /// A transport that scripts a per-message outcome.
    pub fn with_outcome<F>(outcome: F) -> Self
    where
        F: Fn(&OutboundMessage) -> MockOutcome + Send + Sync + 'static,
    {
        Self {
            outcome: Arc::new(outcome),
            fail_connect: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            connected_hosts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every subsequent connect attempt fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// How many producer connections have been established.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// How many producer connections have been shut down.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// The broker sets passed to successful connects, in order.
    pub fn connected_hosts(&self) -> Vec<String> {
        self.connected_hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MockTransport {
    fn connect(&self, hosts: &str) -> Result<TransportChannels> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connect {
                destination: hosts.to_string(),
                message: "mock connect refused".to_string(),
            });
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hosts.to_string());

        let (input_tx, mut input_rx) = mpsc::channel::<OutboundMessage>(64);
        let (success_tx, success_rx) = mpsc::channel(64);
        let (error_tx, error_rx) = mpsc::channel(64);

        let outcome = self.outcome.clone();
        let closes = self.closes.clone();
        tokio::spawn(async move {
            while let Some(msg) = input_rx.recv().await {
                match outcome(&msg) {
                    MockOutcome::Success => {
                        if success_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    MockOutcome::Fail(err) => {
                        if error_tx.send((msg, err)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            closes.fetch_add(1, Ordering::SeqCst);
        });

        Ok(TransportChannels {
            input: input_tx,
            successes: success_rx,
            errors: error_rx,
        })
    }
}
