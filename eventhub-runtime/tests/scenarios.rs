//! End-to-end scenarios spanning a hub, its registered broker ports, and the
//! in-memory test double from `eventhub-testing`.

use eventhub_core::{BrokerPort, Event};
use eventhub_runtime::EventHub;
use eventhub_testing::fixtures::running_hub;
use eventhub_testing::mocks::InMemoryBrokerPort;
use std::sync::Arc;

#[tokio::test]
async fn aggregate_publish_scenario_reaches_every_connected_port() {
    let hub: EventHub<u32> = running_hub("orders-hub");

    let primary = Arc::new(InMemoryBrokerPort::new("primary-broker"));
    let secondary = Arc::new(InMemoryBrokerPort::new("secondary-broker"));
    hub.register_port(primary.clone()).unwrap();
    hub.register_port(secondary.clone()).unwrap();

    hub.connect_to_external_broker("primary-broker").await.unwrap();
    hub.connect_to_external_broker("secondary-broker").await.unwrap();

    let event = Event::new("OrderPlaced", "orders-hub", 42u32);
    hub.publish_to_external_brokers(&event).await.unwrap();

    assert_eq!(primary.published().len(), 1);
    assert_eq!(secondary.published().len(), 1);
    assert_eq!(primary.published()[0].id, event.id);
}

#[tokio::test]
async fn aggregate_publish_reports_failure_for_unready_ports_without_blocking_others() {
    let hub: EventHub<u32> = running_hub("orders-hub");

    let connected = Arc::new(InMemoryBrokerPort::new("connected-broker"));
    let never_connected = Arc::new(InMemoryBrokerPort::new("offline-broker"));
    hub.register_port(connected.clone()).unwrap();
    hub.register_port(never_connected).unwrap();
    hub.connect_to_external_broker("connected-broker").await.unwrap();

    let event = Event::new("OrderPlaced", "orders-hub", 1u32);
    let err = hub.publish_to_external_brokers(&event).await.unwrap_err();
    assert!(matches!(err, eventhub_core::HubError::DeliveryFailed { .. }));

    // The connected port still received the event despite the other's failure.
    assert_eq!(connected.published().len(), 1);
}

#[tokio::test]
async fn inbound_broker_events_reach_a_subscribed_listener() {
    let hub: EventHub<u32> = running_hub("orders-hub");
    let port = Arc::new(InMemoryBrokerPort::new("upstream-broker"));
    hub.register_port(port.clone()).unwrap();
    hub.connect_to_external_broker("upstream-broker").await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    port.subscribe(Arc::new(move |event: eventhub_core::broker_port::PortEvent| {
        let _ = tx.send(event.id);
    }))
    .await
    .unwrap();

    let inbound = Event::new("InventoryReserved", "warehouse-service", 7u32);
    let wire = eventhub_core::broker_port::PortEvent::from_event(&inbound).unwrap();
    port.deliver(wire);

    assert_eq!(rx.recv().await, Some(inbound.id));
}

#[tokio::test]
async fn shutdown_disconnects_every_registered_port() {
    let hub: EventHub<u32> = running_hub("orders-hub");
    let port = Arc::new(InMemoryBrokerPort::new("primary-broker"));
    hub.register_port(port.clone()).unwrap();
    hub.connect_to_external_broker("primary-broker").await.unwrap();
    assert!(port.is_ready());

    hub.stop().await.unwrap();
    assert!(!port.is_ready());
}
