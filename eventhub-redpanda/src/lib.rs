//! Redpanda/Kafka [`BrokerPort`] adapter for the event hub.
//!
//! Uses `rdkafka` (Kafka-compatible client) so the same adapter works
//! against Redpanda, Apache Kafka, AWS MSK, or any other Kafka-wire-protocol
//! broker. Delivery is at-least-once: inbound messages are handed to the
//! registered listener and only committed afterward, so a crash between
//! receipt and commit redelivers rather than drops (callers must be
//! idempotent — correlation ids exist for exactly this).
//!
//! # Example
//!
//! ```no_run
//! use eventhub_core::config::PortConfig;
//! use eventhub_redpanda::RedpandaBrokerPort;
//!
//! # async fn example() -> Result<(), eventhub_core::HubError> {
//! let config = PortConfig::new(serde_json::json!({
//!     "brokers": "localhost:9092",
//!     "topic": "order-events",
//! }));
//! let port = RedpandaBrokerPort::new("orders-kafka", config)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use eventhub_core::broker_port::{BoxFuture, BrokerPort, BrokerPortBase, InboundHandler, PortEvent, PortMetrics};
use eventhub_core::config::PortConfig;
use eventhub_core::error::HubError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Parsed shape of [`PortConfig::connection`] for this adapter. Other
/// fields in `connection` are ignored.
struct ConnectionDescriptor {
    brokers: String,
    topic: String,
    producer_acks: String,
    compression: String,
    consumer_group: Option<String>,
    auto_offset_reset: String,
}

impl ConnectionDescriptor {
    fn parse(value: &serde_json::Value) -> Result<Self, HubError> {
        let brokers = value
            .get("brokers")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| HubError::InvalidConfig {
                operation: "RedpandaBrokerPort::new",
                detail: "connection.brokers is required".to_string(),
            })?
            .to_string();
        let topic = value
            .get("topic")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| HubError::InvalidConfig {
                operation: "RedpandaBrokerPort::new",
                detail: "connection.topic is required".to_string(),
            })?
            .to_string();
        Ok(Self {
            brokers,
            topic,
            producer_acks: value.get("producerAcks").and_then(serde_json::Value::as_str).unwrap_or("1").to_string(),
            compression: value.get("compression").and_then(serde_json::Value::as_str).unwrap_or("none").to_string(),
            consumer_group: value.get("consumerGroup").and_then(serde_json::Value::as_str).map(str::to_string),
            auto_offset_reset: value
                .get("autoOffsetReset")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("latest")
                .to_string(),
        })
    }
}

/// A broker port backed by a Kafka-compatible cluster.
///
/// One port is bound to one outbound topic (`connection.topic`) and to
/// whatever inbound topics are named in [`PortConfig::subscriptions`].
/// `connect`/`disconnect` are idempotent, as [`BrokerPort`] requires:
/// calling `connect` while already connected just returns `Ok(())`.
pub struct RedpandaBrokerPort {
    base: Arc<BrokerPortBase>,
    name: String,
    brokers: String,
    publish_topic: String,
    producer_acks: String,
    compression: String,
    consumer_group: Option<String>,
    auto_offset_reset: String,
    subscriptions: Vec<String>,
    connect_timeout: Duration,
    producer: Mutex<Option<FutureProducer>>,
    consumer_task: Mutex<Option<JoinHandle<()>>>,
}

impl RedpandaBrokerPort {
    /// Construct a port from a name and configuration. Does not connect —
    /// call [`BrokerPort::connect`] before publishing.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `config.connection` is
    /// missing `brokers` or `topic`.
    pub fn new(name: impl Into<String>, config: PortConfig) -> Result<Self, HubError> {
        let descriptor = ConnectionDescriptor::parse(&config.connection)?;
        Ok(Self {
            base: Arc::new(BrokerPortBase::new()),
            name: name.into(),
            brokers: descriptor.brokers,
            publish_topic: descriptor.topic,
            producer_acks: descriptor.producer_acks,
            compression: descriptor.compression,
            consumer_group: descriptor.consumer_group,
            auto_offset_reset: descriptor.auto_offset_reset,
            subscriptions: config.subscriptions,
            connect_timeout: Duration::from_millis(config.connection_timeout_ms.unwrap_or(5_000)),
            producer: Mutex::new(None),
            consumer_task: Mutex::new(None),
        })
    }

    fn consumer_group_id(&self) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            let mut topics = self.subscriptions.clone();
            topics.sort();
            format!("eventhub-{}", topics.join("-"))
        })
    }
}

impl BrokerPort for RedpandaBrokerPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_type(&self) -> &str {
        "redpanda"
    }

    fn connect(&self) -> BoxFuture<'_, Result<(), HubError>> {
        Box::pin(async move {
            if self.base.is_connected() {
                return Ok(());
            }
            let mut client_config = ClientConfig::new();
            client_config
                .set("bootstrap.servers", &self.brokers)
                .set("message.timeout.ms", self.connect_timeout.as_millis().to_string())
                .set("acks", &self.producer_acks)
                .set("compression.type", &self.compression);

            let producer: FutureProducer = client_config.create().map_err(|e| HubError::DeliveryFailed {
                operation: "connect",
                detail: format!("failed to create Kafka producer: {e}"),
                cause: None,
            })?;

            *self.producer.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(producer);
            self.base.set_connected(true);
            tracing::info!(port = %self.name, brokers = %self.brokers, topic = %self.publish_topic, "connected to broker");
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), HubError>> {
        Box::pin(async move {
            if let Some(task) = self.consumer_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
                task.abort();
            }
            self.base.clear_listener();
            *self.producer.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
            self.base.set_connected(false);
            tracing::info!(port = %self.name, "disconnected from broker");
            Ok(())
        })
    }

    fn publish(&self, event: &PortEvent) -> BoxFuture<'_, Result<(), HubError>> {
        let event = event.clone();
        Box::pin(async move {
            let producer = self
                .producer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            let Some(producer) = producer else {
                return Err(HubError::InvalidState {
                    operation: "publish",
                    detail: format!("port '{}' is not connected", self.name),
                });
            };

            let wire = serde_json::to_vec(&event).map_err(|e| HubError::ValidationFailed {
                operation: "publish",
                detail: format!("event is not JSON-serializable: {e}"),
            })?;
            let key = event.event_type.as_bytes();
            let record = FutureRecord::to(&self.publish_topic).payload(&wire).key(key);

            let started = Instant::now();
            let send_result = producer.send(record, Timeout::After(self.connect_timeout)).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match send_result {
                Ok((partition, offset)) => {
                    self.base.record_publish(true, latency_ms);
                    tracing::debug!(
                        port = %self.name,
                        topic = %self.publish_topic,
                        partition,
                        offset,
                        event_id = %event.id,
                        "event published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    self.base.record_publish(false, latency_ms);
                    tracing::error!(port = %self.name, topic = %self.publish_topic, error = %kafka_error, "publish failed");
                    Err(HubError::DeliveryFailed {
                        operation: "publish",
                        detail: kafka_error.to_string(),
                        cause: None,
                    })
                }
            }
        })
    }

    fn subscribe(&self, listener: InboundHandler) -> BoxFuture<'_, Result<(), HubError>> {
        Box::pin(async move {
            if self.subscriptions.is_empty() {
                return Err(HubError::InvalidConfig {
                    operation: "subscribe",
                    detail: format!("port '{}' has no configured subscriptions", self.name),
                });
            }

            let brokers = self.brokers.clone();
            let group_id = self.consumer_group_id();
            let auto_offset_reset = self.auto_offset_reset.clone();
            let topics = self.subscriptions.clone();

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| HubError::DeliveryFailed {
                    operation: "subscribe",
                    detail: format!("failed to create Kafka consumer: {e}"),
                    cause: None,
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| HubError::DeliveryFailed {
                operation: "subscribe",
                detail: format!("failed to subscribe to topics: {e}"),
                cause: None,
            })?;

            self.base.set_listener(listener);
            let port_name = self.name.clone();
            let base = self.base.clone();

            tracing::info!(port = %self.name, topics = ?topics, group = %group_id, "subscribed");

            let handle = tokio::spawn(run_consumer_loop(consumer, port_name, base));
            *self.consumer_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
            Ok(())
        })
    }

    fn unsubscribe(&self) -> BoxFuture<'_, Result<(), HubError>> {
        Box::pin(async move {
            if let Some(task) = self.consumer_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
                task.abort();
            }
            self.base.clear_listener();
            Ok(())
        })
    }

    fn is_ready(&self) -> bool {
        self.base.is_connected()
    }

    fn is_subscribed(&self) -> bool {
        self.base.is_subscribed()
    }

    fn metrics(&self) -> PortMetrics {
        self.base.metrics()
    }
}

/// Owns the Kafka consumer for the lifetime of a subscription: streams
/// messages, decodes each as a [`PortEvent`], hands it to
/// [`BrokerPortBase::handle_incoming_event`], and only commits the offset
/// once that call returns — so a crash between receipt and commit
/// redelivers the message rather than losing it.
async fn run_consumer_loop(consumer: StreamConsumer, port_name: String, base: Arc<BrokerPortBase>) {
    use futures::StreamExt;
    use rdkafka::consumer::CommitMode;

    let mut stream = consumer.stream();
    while let Some(message_result) = stream.next().await {
        match message_result {
            Ok(message) => {
                let Some(payload) = message.payload() else {
                    tracing::warn!(port = %port_name, "message has no payload, skipping");
                    let _ = consumer.commit_message(&message, CommitMode::Async);
                    continue;
                };
                match serde_json::from_slice::<PortEvent>(payload) {
                    Ok(event) => {
                        base.handle_incoming_event(event);
                    }
                    Err(e) => {
                        tracing::warn!(port = %port_name, error = %e, "failed to decode inbound event");
                    }
                }
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(port = %port_name, error = %e, "failed to commit offset");
                }
            }
            Err(e) => {
                tracing::error!(port = %port_name, error = %e, "error receiving from broker");
            }
        }
    }
    tracing::debug!(port = %port_name, "consumer loop exited");
}
