//! Integration tests for [`RedpandaBrokerPort`] against a real Kafka/Redpanda
//! instance, started via `testcontainers`. Require a working Docker daemon;
//! they are not run as part of a normal unit-test pass.
//!
//! # Panics
//!
//! These tests use `expect()` and `panic!()` for setup failures, which is
//! acceptable in test code.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use eventhub_core::broker_port::PortEvent;
use eventhub_core::config::PortConfig;
use eventhub_core::event::Event;
use eventhub_core::BrokerPort;
use eventhub_redpanda::RedpandaBrokerPort;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::kafka::{Kafka, KAFKA_PORT};

async fn start_broker() -> String {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("failed to start Kafka container");
    let host = kafka.get_host().await.expect("failed to get host");
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await.expect("failed to get port");
    // Leak the container so it stays alive for the test's duration; the
    // Docker daemon reclaims it when the process exits.
    std::mem::forget(kafka);
    format!("{host}:{port}")
}

fn port_for(brokers: &str, topic: &str, group: Option<&str>) -> RedpandaBrokerPort {
    let mut connection = serde_json::json!({
        "brokers": brokers,
        "topic": topic,
        "autoOffsetReset": "earliest",
    });
    if let Some(group) = group {
        connection["consumerGroup"] = serde_json::Value::String(group.to_string());
    }
    let mut config = PortConfig::new(connection);
    config.subscriptions = vec![topic.to_string()];
    RedpandaBrokerPort::new(format!("kafka-{topic}"), config).expect("valid port config")
}

fn collector() -> (Arc<Mutex<Vec<PortEvent>>>, eventhub_core::broker_port::InboundHandler) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let handler_received = received.clone();
    let handler: eventhub_core::broker_port::InboundHandler = Arc::new(move |event: PortEvent| {
        handler_received.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(event);
    });
    (received, handler)
}

async fn wait_until(received: &Arc<Mutex<Vec<PortEvent>>>, count: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if received.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len() >= count {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {count} events");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn publish_and_subscribe_round_trip() {
    let brokers = start_broker().await;
    let port = port_for(&brokers, "test-events", None);
    port.connect().await.expect("connect");

    let (received, handler) = collector();
    port.subscribe(handler).await.expect("subscribe");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let order = Event::new("OrderPlaced", "orders-service", serde_json::json!({"id": 1}));
    let payment = Event::new("PaymentCompleted", "payments-service", serde_json::json!({"id": 1}));
    port.publish(&PortEvent::from_event(&order).unwrap()).await.expect("publish order");
    port.publish(&PortEvent::from_event(&payment).unwrap()).await.expect("publish payment");

    wait_until(&received, 2, Duration::from_secs(10)).await;

    let events = received.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let types: HashSet<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains("OrderPlaced"));
    assert!(types.contains("PaymentCompleted"));
    assert_eq!(port.metrics().total_published, 2);
}

#[tokio::test]
async fn at_least_once_delivery_survives_publish_before_subscribe() {
    let brokers = start_broker().await;
    let publisher = port_for(&brokers, "persistence-test", Some("at-least-once-test"));
    publisher.connect().await.expect("connect");

    let first = Event::new("Event1", "svc", 1u32);
    let second = Event::new("Event2", "svc", 2u32);
    publisher.publish(&PortEvent::from_event(&first).unwrap()).await.expect("publish 1");
    publisher.publish(&PortEvent::from_event(&second).unwrap()).await.expect("publish 2");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let subscriber = port_for(&brokers, "persistence-test", Some("at-least-once-test"));
    subscriber.connect().await.expect("connect");
    let (received, handler) = collector();
    subscriber.subscribe(handler).await.expect("subscribe");

    wait_until(&received, 2, Duration::from_secs(10)).await;
    let events = received.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "Event1");
    assert_eq!(events[1].event_type, "Event2");
}

#[tokio::test]
async fn event_ordering_is_preserved_within_a_topic() {
    let brokers = start_broker().await;
    let port = port_for(&brokers, "ordering-test", None);
    port.connect().await.expect("connect");
    let (received, handler) = collector();
    port.subscribe(handler).await.expect("subscribe");
    tokio::time::sleep(Duration::from_millis(500)).await;

    for i in 0..5u32 {
        let event = Event::new("OrderEvent", "orders-service", i);
        port.publish(&PortEvent::from_event(&event).unwrap()).await.expect("publish");
    }

    wait_until(&received, 5, Duration::from_secs(10)).await;
    let events = received.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    for (i, event) in events.iter().enumerate() {
        let data: u32 = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(data, i as u32);
    }
}

#[tokio::test]
async fn disconnect_stops_delivering_to_the_listener() {
    let brokers = start_broker().await;
    let port = port_for(&brokers, "disconnect-test", None);
    port.connect().await.expect("connect");
    let (received, handler) = collector();
    port.subscribe(handler).await.expect("subscribe");
    tokio::time::sleep(Duration::from_millis(500)).await;

    port.disconnect().await.expect("disconnect");
    assert!(!port.is_ready());
    assert!(!port.is_subscribed());
}
