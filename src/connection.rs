//! One live producer connection to a destination.
//!
//! A connection owns the transport channels for one (cluster, topic) pair
//! and the two listener tasks that funnel broker acknowledgements and
//! errors back into per-batch completion tracking. Connections are owned
//! exclusively by the [`ConnectionCache`](crate::cache::ConnectionCache).

use crate::error::PublishError;
use crate::message::OutboundMessage;
use crate::transport::{Transport, TransportChannels};
use crate::Result;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// How long the producer rejects all inputs once its queue has filled up.
/// Matches the transport's own circuit-breaker window.
const BREAKER_COOLDOWN: Duration = Duration::from_secs(10);

pub struct Connection {
    cluster: String,
    hosts: String,
    topic: String,
    state: Mutex<ConnectionState>,
}

enum ConnectionState {
    Unconnected,
    Active(Active),
    Closed,
}

struct Active {
    input: mpsc::Sender<OutboundMessage>,
    shutdown: watch::Sender<bool>,
    listeners: Vec<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        cluster: impl Into<String>,
        hosts: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            hosts: hosts.into(),
            topic: topic.into(),
            state: Mutex::new(ConnectionState::Unconnected),
        }
    }

    pub fn hosts(&self) -> &str {
        &self.hosts
    }

    /// Performs the connect handshake and starts the listener tasks.
    ///
    /// A failure is reported synchronously and is not retried here; the
    /// cache rolls back the entry of a connection that failed to connect.
    pub fn connect(&self, transport: &dyn Transport) -> Result<()> {
        debug!(cluster = %self.cluster, hosts = %self.hosts, topic = %self.topic, "connecting");

        let TransportChannels {
            input,
            successes,
            errors,
        } = transport.connect(&self.hosts).map_err(|e| {
            error!(cluster = %self.cluster, hosts = %self.hosts, error = %e, "connect failed");
            e
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listeners = vec![
            tokio::spawn(success_worker(
                successes,
                self.cluster.clone(),
                self.topic.clone(),
            )),
            tokio::spawn(error_worker(
                errors,
                shutdown_rx,
                self.cluster.clone(),
                self.topic.clone(),
            )),
        ];

        let mut state = self.lock_state();
        *state = ConnectionState::Active(Active {
            input,
            shutdown: shutdown_tx,
            listeners,
        });
        Ok(())
    }

    /// Enqueues a message onto the transport's bounded input channel.
    ///
    /// Blocks under transport backpressure; that bounded channel is the
    /// engine's admission control. A message hitting a closing connection
    /// is accounted as a retry-eligible failure on its batch, not an error.
    pub async fn send(&self, msg: OutboundMessage) {
        let input = match &*self.lock_state() {
            ConnectionState::Active(active) => Some(active.input.clone()),
            _ => None,
        };

        let rejected = match input {
            Some(input) => match input.send(msg).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        warn!(cluster = %self.cluster, topic = %self.topic, "send on closing connection");
        let tracker = Arc::clone(&rejected.tracker);
        tracker.fail(
            rejected,
            PublishError::Transport("connection closing".to_string()),
        );
    }

    /// Stops accepting sends, triggers producer shutdown and waits for both
    /// listener tasks to drain. Called at most once per connection, by the
    /// cache that owns it.
    pub async fn close(&self) {
        let active = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, ConnectionState::Closed) {
                ConnectionState::Active(active) => active,
                _ => return,
            }
        };

        // Dropping the input sender shuts the producer down; the listener
        // streams close once every in-flight delivery has been settled.
        let _ = active.shutdown.send(true);
        drop(active.input);
        for listener in active.listeners {
            if let Err(e) = listener.await {
                warn!(cluster = %self.cluster, topic = %self.topic, error = %e, "listener task failed");
            }
        }
        debug!(cluster = %self.cluster, topic = %self.topic, "closed connection");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn success_worker(mut successes: mpsc::Receiver<OutboundMessage>, cluster: String, topic: String) {
    while let Some(msg) = successes.recv().await {
        let tracker = Arc::clone(&msg.tracker);
        tracker.done(msg);
    }
    debug!(%cluster, %topic, "stopped ack worker");
}

async fn error_worker(
    mut errors: mpsc::Receiver<(OutboundMessage, PublishError)>,
    mut shutdown: watch::Receiver<bool>,
    cluster: String,
    topic: String,
) {
    let mut breaker_open = false;

    while let Some((msg, err)) = errors.recv().await {
        let overloaded = matches!(err, PublishError::Overloaded);
        let tracker = Arc::clone(&msg.tracker);
        tracker.fail(msg, err);

        if overloaded {
            if breaker_open {
                // A closing connection never waits. An earlier cooldown may
                // already have consumed the shutdown notification, so check
                // the flag itself rather than relying on `changed()` alone.
                if !*shutdown.borrow() {
                    warn!(%cluster, %topic, "producer overloaded, waiting out breaker cooldown");
                    tokio::select! {
                        _ = tokio::time::sleep(BREAKER_COOLDOWN) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                breaker_open = false;
            } else {
                breaker_open = true;
            }
        }
    }
    debug!(%cluster, %topic, "stopped error worker");
}
