//! The seam between the engine and the broker library.
//!
//! A transport exposes the async-producer channel model: a bounded input
//! channel (whose backpressure is the engine's admission control), a success
//! stream and an error stream. Dropping the input sender initiates producer
//! shutdown; the transport drains in-flight deliveries and then closes the
//! outcome streams, which is what terminates a connection's listener tasks.

pub mod kafka;
pub mod mock;

use crate::error::PublishError;
use crate::message::OutboundMessage;
use crate::Result;
use tokio::sync::mpsc;

pub use kafka::KafkaTransport;
pub use mock::MockTransport;

/// The live channels of one producer connection.
pub struct TransportChannels {
    /// Outbound messages; bounded, so sends block under backpressure.
    pub input: mpsc::Sender<OutboundMessage>,
    /// Messages acknowledged by the broker.
    pub successes: mpsc::Receiver<OutboundMessage>,
    /// Messages the broker (or producer) rejected, with the classification.
    pub errors: mpsc::Receiver<(OutboundMessage, PublishError)>,
}

/// A factory for producer connections to a broker set.
///
/// `connect` performs the handshake synchronously and reports failure to the
/// caller; it is never retried internally. Must be called from within a
/// tokio runtime, as transports spawn their driver tasks here.
pub trait Transport: Send + Sync {
    fn connect(&self, hosts: &str) -> Result<TransportChannels>;
}
