//! The public entry point of the engine.
//!
//! For each record of a batch the dispatcher resolves the destination via
//! the injected selectors, obtains the producer connection from the cache,
//! encodes the record and hands the resulting message to the connection
//! together with the batch's completion tracker. Per-record failures never
//! abort the rest of the batch; they are accounted on the tracker.

use crate::cache::ConnectionCache;
use crate::codec::Codec;
use crate::config::FanoutConfig;
use crate::connection::Connection;
use crate::key_strategy::KeyStrategy;
use crate::message::OutboundMessage;
use crate::pipeline::{Batch, Observer, Record};
use crate::route::{DestinationKey, RouteSelector};
use crate::tracker::CompletionTracker;
use crate::transport::Transport;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    cache: Arc<ConnectionCache>,
    routes: RouteSelector,
    key: KeyStrategy,
    codec: Arc<dyn Codec>,
    observer: Arc<dyn Observer>,
    index: String,
}

impl Dispatcher {
    pub fn new(
        config: &FanoutConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<ConnectionCache>,
        codec: Arc<dyn Codec>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            transport,
            cache,
            routes: config.route.clone(),
            key: config.key.clone(),
            codec,
            observer,
            index: config.index.to_lowercase(),
        }
    }

    /// Publishes one batch.
    ///
    /// Returns `Err` only when dispatch could not be attempted at all;
    /// per-record outcomes are delivered through the batch's own ack/retry
    /// contract once every message has been accounted.
    pub async fn publish(&self, batch: Box<dyn Batch>) -> Result<()> {
        let records: Vec<Record> = batch.events().to_vec();
        self.observer.batch_started(records.len());
        debug!(count = records.len(), "dispatching batch");

        if records.is_empty() {
            batch.ack();
            return Ok(());
        }

        let tracker = CompletionTracker::new(batch, self.observer.clone());
        for record in &records {
            if let Err(e) = self.dispatch_record(record, &tracker).await {
                warn!(error = %e, "dropping record");
                tracker.record_dropped();
            }
        }
        Ok(())
    }

    async fn dispatch_record(
        &self,
        record: &Record,
        tracker: &Arc<CompletionTracker>,
    ) -> Result<()> {
        let topic = self.routes.topic.select(record)?;
        let cluster = self.routes.cluster.select(record)?;
        let key = DestinationKey::new(cluster, topic);

        // The hosts selector is only consulted when a new connection has to
        // be built; an established destination already knows its brokers.
        let conn = self
            .cache
            .get_or_create(&key, self.transport.as_ref(), || {
                let hosts = self.routes.hosts.select(record)?;
                Ok(Connection::new(
                    key.cluster.clone(),
                    hosts,
                    key.topic.clone(),
                ))
            })
            .await?;

        let payload = self.codec.encode(&self.index, record)?;
        let partition_key = self.key.extract_key(record).map(Bytes::from);

        let msg = OutboundMessage {
            topic: key.topic,
            key: partition_key,
            payload,
            timestamp: record.timestamp,
            record: record.clone(),
            tracker: tracker.clone(),
        };
        conn.send(msg).await;
        Ok(())
    }

    /// Human-readable list of the live destinations, for logs.
    pub async fn summary(&self) -> String {
        let connections = self.cache.connections().await;
        if connections.is_empty() {
            return "kafka fanout ( no live connections )".to_string();
        }
        let parts: Vec<String> = connections
            .iter()
            .map(|(key, conn)| format!("{}:{}", key, conn.hosts()))
            .collect();
        format!("kafka fanout ( {} )", parts.join(","))
    }

    /// Closes the connection cache and with it every live connection.
    pub async fn close(&self) {
        self.cache.close().await;
    }
}
