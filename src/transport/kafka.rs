use crate::config::ProducerConfig;
use crate::error::PublishError;
use crate::message::OutboundMessage;
use crate::transport::{Transport, TransportChannels};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

type DeliveryOutcome = std::result::Result<(i32, i64), KafkaError>;
type InFlight = FuturesUnordered<BoxFuture<'static, (OutboundMessage, DeliveryOutcome)>>;

/// The production transport, backed by an rdkafka [`FutureProducer`].
///
/// Each `connect` builds one producer for one broker set and spawns a driver
/// task that forwards input messages to the producer and settles delivery
/// futures onto the success/error streams.
pub struct KafkaTransport {
    config: ProducerConfig,
}

impl KafkaTransport {
    pub fn new(config: ProducerConfig) -> Self {
        Self { config }
    }
}

impl Transport for KafkaTransport {
    fn connect(&self, hosts: &str) -> Result<TransportChannels> {
        debug!(hosts, "creating kafka producer");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", hosts)
            .set("compression.type", &self.config.compression)
            .set("acks", &self.config.acks)
            .set("linger.ms", self.config.linger_ms.to_string())
            .set("batch.size", self.config.batch_size.to_string())
            .set(
                "queue.buffering.max.messages",
                self.config.queue_max_messages.to_string(),
            )
            .set(
                "message.timeout.ms",
                self.config.message_timeout_ms.to_string(),
            )
            .create()
            .map_err(Error::Kafka)?;

        let capacity = self.config.channel_capacity;
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (success_tx, success_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);

        tokio::spawn(drive(producer, input_rx, success_tx, error_tx));

        Ok(TransportChannels {
            input: input_tx,
            successes: success_rx,
            errors: error_rx,
        })
    }
}

/// Pumps messages into the producer and delivery outcomes back out.
///
/// Runs until the input channel closes, then flushes every in-flight
/// delivery before dropping the outcome senders.
async fn drive(
    producer: FutureProducer,
    mut input: mpsc::Receiver<OutboundMessage>,
    successes: mpsc::Sender<OutboundMessage>,
    errors: mpsc::Sender<(OutboundMessage, PublishError)>,
) {
    let mut in_flight: InFlight = FuturesUnordered::new();

    loop {
        tokio::select! {
            msg = input.recv() => match msg {
                Some(msg) => submit(&producer, msg, &mut in_flight, &errors).await,
                None => break,
            },
            Some((msg, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                settle(msg, outcome, &successes, &errors).await;
            }
        }
    }

    while let Some((msg, outcome)) = in_flight.next().await {
        settle(msg, outcome, &successes, &errors).await;
    }

    if let Err(e) = producer.flush(Duration::from_secs(30)) {
        warn!(error = %e, "kafka producer flush failed during shutdown");
    }
    debug!("kafka producer driver stopped");
}

async fn submit(
    producer: &FutureProducer,
    msg: OutboundMessage,
    in_flight: &mut InFlight,
    errors: &mpsc::Sender<(OutboundMessage, PublishError)>,
) {
    let delivery = {
        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&msg.topic)
            .payload(msg.payload.as_ref())
            .timestamp(msg.timestamp.timestamp_millis());
        if let Some(key) = msg.key.as_ref() {
            record = record.key(key.as_ref());
        }
        producer.send_result(record)
    };

    match delivery {
        Ok(future) => in_flight.push(Box::pin(async move {
            let outcome = match future.await {
                Ok(Ok((partition, offset))) => Ok((partition, offset)),
                Ok(Err((e, _owned))) => Err(e),
                // The producer was dropped with the delivery unresolved.
                Err(_canceled) => Err(KafkaError::Canceled),
            };
            (msg, outcome)
        })),
        Err((e, _record)) => {
            let size = msg.encoded_size();
            let err = classify(&e, size);
            if errors.send((msg, err)).await.is_err() {
                warn!("error stream closed while rejecting message");
            }
        }
    }
}

async fn settle(
    msg: OutboundMessage,
    outcome: DeliveryOutcome,
    successes: &mpsc::Sender<OutboundMessage>,
    errors: &mpsc::Sender<(OutboundMessage, PublishError)>,
) {
    match outcome {
        Ok((partition, offset)) => {
            trace!(topic = %msg.topic, partition, offset, "message delivered");
            let _ = successes.send(msg).await;
        }
        Err(e) => {
            let size = msg.encoded_size();
            let err = classify(&e, size);
            let _ = errors.send((msg, err)).await;
        }
    }
}

/// Maps rdkafka errors onto the engine's failure taxonomy.
pub(crate) fn classify(err: &KafkaError, size: usize) -> PublishError {
    match err {
        KafkaError::MessageProduction(code) => match code {
            RDKafkaErrorCode::InvalidMessage => PublishError::Malformed,
            RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessageSize => {
                PublishError::TooLarge { size }
            }
            RDKafkaErrorCode::QueueFull => PublishError::Overloaded,
            code => PublishError::Transport(code.to_string()),
        },
        other => PublishError::Transport(other.to_string()),
    }
}
