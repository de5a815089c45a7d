//! Error types and result handling for kafka-fanout.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate, plus [`PublishError`],
//! the per-message failure classification reported by the transport.
//!
//! # Example
//!
//! ```rust
//! use kafka_fanout::{Error, Result};
//!
//! fn resolve_cluster() -> Result<String> {
//!     // Simulating a selector that cannot resolve against the record
//!     Err(Error::Selector("field 'meta.cluster' not found".to_string()))
//! }
//!
//! match resolve_cluster() {
//!     Ok(cluster) => println!("Routing to {}", cluster),
//!     Err(Error::Selector(msg)) => eprintln!("Selector error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-fanout operations.
///
/// These are the synchronous failures: routing, encoding, connect and
/// cache-lifecycle problems. Asynchronous delivery failures are reported
/// per message as [`PublishError`] through the batch's completion tracker.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically an invalid routing or cache setting.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding records.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A selector could not resolve cluster, topic or hosts from a record.
    #[error("Selector error: {0}")]
    Selector(String),

    /// The codec failed to encode a record.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Establishing a producer connection to a broker set failed.
    #[error("Connect error for {destination}: {message}")]
    Connect {
        /// The destination whose connect handshake failed
        destination: String,
        /// Description of the connect failure
        message: String,
    },

    /// The connection cache has been closed and no longer accepts lookups.
    #[error("Connection cache is closed")]
    CacheClosed,
}

/// Classification of an asynchronous delivery failure.
///
/// Mirrors the error taxonomy of the underlying transport: invalid and
/// oversized messages are dropped outright, queue-full rejections are
/// transient, everything else is a retryable transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker rejected the message as malformed. Drop only.
    #[error("invalid message")]
    Malformed,

    /// The message exceeds the broker's size limit. Drop only.
    #[error("message too large ({size} bytes)")]
    TooLarge {
        /// Combined key and payload size in bytes
        size: usize,
    },

    /// The producer's send buffer is full. Retry-eligible, and a sign of
    /// transient overload rather than a definitive failure.
    #[error("producer queue full")]
    Overloaded,

    /// Any other transport-level failure. Retry-eligible.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PublishError {
    /// Whether the failed record should be handed back to the caller for
    /// re-submission, as opposed to being dropped and counted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Overloaded | PublishError::Transport(_))
    }
}

/// A convenient Result type alias for kafka-fanout operations.
///
/// This is equivalent to `std::result::Result<T, kafka_fanout::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
