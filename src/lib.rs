pub mod cache;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod key_strategy;
pub mod message;
pub mod pipeline;
pub mod route;
pub mod tracker;

pub mod transport;

pub use cache::ConnectionCache;
pub use codec::{Codec, JsonCodec};
pub use config::{CacheConfig, FanoutConfig, ProducerConfig};
pub use dispatch::Dispatcher;
pub use error::{Error, PublishError, Result};
pub use key_strategy::KeyStrategy;
pub use message::OutboundMessage;
pub use pipeline::{Batch, NoopObserver, Observer, Record};
pub use route::{DestinationKey, RouteSelector, Selector};
pub use transport::{KafkaTransport, MockTransport, Transport};
