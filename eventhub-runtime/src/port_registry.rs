//! Aggregates every broker port registered on a hub: named lookup plus a
//! fan-out publisher/subscriber over whatever adapters are currently
//! connected ("aggregate publish").

use eventhub_core::broker_port::{BrokerPort, InboundHandler, PortEvent, PortMetrics};
use eventhub_core::error::HubError;
use eventhub_core::event::Event;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Owns every broker port registered on a hub.
#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<HashMap<String, Arc<dyn BrokerPort>>>,
}

impl PortRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port under `port.name()`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyExists`] if a port with that name is
    /// already registered.
    pub fn register(&self, port: Arc<dyn BrokerPort>) -> Result<(), HubError> {
        let mut ports = self.ports.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let name = port.name().to_string();
        if ports.contains_key(&name) {
            return Err(HubError::AlreadyExists { kind: "port", name });
        }
        ports.insert(name, port);
        Ok(())
    }

    /// Remove a registered port without disconnecting it; callers should
    /// `disconnect` first if they care about a clean shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no port with that name is
    /// registered.
    pub fn unregister(&self, name: &str) -> Result<(), HubError> {
        self.ports
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HubError::NotFound {
                kind: "port",
                name: name.to_string(),
            })
    }

    /// Look up a registered port by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no port with that name is
    /// registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn BrokerPort>, HubError> {
        self.ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::NotFound {
                kind: "port",
                name: name.to_string(),
            })
    }

    /// Names of every registered port.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Connect to a named external broker.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `name` isn't registered, or
    /// whatever the adapter's `connect` returns.
    pub async fn connect(&self, name: &str) -> Result<(), HubError> {
        self.get(name)?.connect().await
    }

    /// Disconnect a named external broker.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `name` isn't registered, or
    /// whatever the adapter's `disconnect` returns.
    pub async fn disconnect(&self, name: &str) -> Result<(), HubError> {
        self.get(name)?.disconnect().await
    }

    /// Disconnect every registered port, collecting (not short-circuiting
    /// on) individual failures.
    pub async fn disconnect_all(&self) {
        let ports: Vec<Arc<dyn BrokerPort>> = self
            .ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for port in ports {
            if let Err(e) = port.disconnect().await {
                tracing::warn!(port = port.name(), error = %e, "error disconnecting broker port during shutdown");
            }
        }
    }

    /// Publish to one named port.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `name` isn't registered, or
    /// whatever the adapter's `publish` returns.
    pub async fn publish_to<D: Serialize>(&self, name: &str, event: &Event<D>) -> Result<(), HubError> {
        let wire = PortEvent::from_event(event)?;
        self.get(name)?.publish(&wire).await
    }

    /// Publish to every registered, ready port. Attempts every port even if
    /// one fails; returns a composite [`HubError::DeliveryFailed`] if any
    /// did.
    pub async fn publish_all<D: Serialize>(&self, event: &Event<D>) -> Result<(), HubError> {
        let wire = PortEvent::from_event(event)?;
        let ports: Vec<Arc<dyn BrokerPort>> = self
            .ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut failures = Vec::new();
        for port in &ports {
            if !port.is_ready() {
                failures.push(format!("{}: not connected", port.name()));
                continue;
            }
            if let Err(e) = port.publish(&wire).await {
                failures.push(format!("{}: {e}", port.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HubError::DeliveryFailed {
                operation: "publish_all",
                detail: format!("{}/{} ports failed: {}", failures.len(), ports.len(), failures.join("; ")),
                cause: None,
            })
        }
    }

    /// Register `listener` on every port that supports inbound
    /// subscription; ports that don't (`supports_subscribe() == false`)
    /// are silently skipped.
    pub async fn subscribe_all(&self, listener: InboundHandler) {
        let ports: Vec<Arc<dyn BrokerPort>> = self
            .ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for port in ports {
            if !port.supports_subscribe() {
                continue;
            }
            if let Err(e) = port.subscribe(listener.clone()).await {
                tracing::warn!(port = port.name(), error = %e, "failed to subscribe broker port");
            }
        }
    }

    /// Remove `listener` from every port that supports inbound
    /// subscription; ports that don't are silently skipped.
    pub async fn unsubscribe_all(&self) {
        let ports: Vec<Arc<dyn BrokerPort>> = self
            .ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for port in ports {
            if !port.supports_subscribe() {
                continue;
            }
            if let Err(e) = port.unsubscribe().await {
                tracing::warn!(port = port.name(), error = %e, "failed to unsubscribe broker port");
            }
        }
    }

    /// `true` if any registered port is connected and ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .any(|port| port.is_ready())
    }

    /// `true` if any registered port has an active inbound subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.ports
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .any(|port| port.is_subscribed())
    }

    /// Metrics for one named port.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `name` isn't registered.
    pub fn metrics(&self, name: &str) -> Result<PortMetrics, HubError> {
        Ok(self.get(name)?.metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhub_core::broker_port::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubPort {
        name: String,
        ready: AtomicBool,
        subscribed: AtomicBool,
    }

    impl BrokerPort for StubPort {
        fn name(&self) -> &str {
            &self.name
        }

        fn port_type(&self) -> &str {
            "stub"
        }

        fn connect(&self) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            })
        }

        fn disconnect(&self) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.ready.store(false, Ordering::SeqCst);
                Ok(())
            })
        }

        fn publish(&self, _event: &PortEvent) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move { Ok(()) })
        }

        fn subscribe(&self, _listener: InboundHandler) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.subscribed.store(true, Ordering::SeqCst);
                Ok(())
            })
        }

        fn unsubscribe(&self) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.subscribed.store(false, Ordering::SeqCst);
                Ok(())
            })
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn is_subscribed(&self) -> bool {
            self.subscribed.load(Ordering::SeqCst)
        }

        fn metrics(&self) -> PortMetrics {
            PortMetrics::default()
        }
    }

    fn stub(name: &str) -> Arc<StubPort> {
        Arc::new(StubPort {
            name: name.to_string(),
            ready: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = PortRegistry::new();
        registry.register(stub("kafka-main")).unwrap();
        assert_eq!(registry.get("kafka-main").unwrap().name(), "kafka-main");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_name() {
        let registry = PortRegistry::new();
        registry.register(stub("kafka-main")).unwrap();
        let err = registry.register(stub("kafka-main")).unwrap_err();
        assert!(matches!(err, HubError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn connect_to_unregistered_name_is_not_found() {
        let registry = PortRegistry::new();
        let err = registry.connect("missing").await.unwrap_err();
        assert!(matches!(err, HubError::NotFound { .. }));
    }

    #[tokio::test]
    async fn publish_all_skips_ports_that_are_not_ready() {
        let registry = PortRegistry::new();
        registry.register(stub("a")).unwrap();
        let event = Event::new("x", "hub", 1u32);
        let err = registry.publish_all(&event).await.unwrap_err();
        assert!(matches!(err, HubError::DeliveryFailed { .. }));
    }

    #[tokio::test]
    async fn publish_all_succeeds_once_connected() {
        let registry = PortRegistry::new();
        registry.register(stub("a")).unwrap();
        registry.connect("a").await.unwrap();
        let event = Event::new("x", "hub", 1u32);
        registry.publish_all(&event).await.unwrap();
    }

    #[tokio::test]
    async fn is_ready_is_false_when_no_port_is_ready() {
        let registry = PortRegistry::new();
        registry.register(stub("a")).unwrap();
        assert!(!registry.is_ready());
    }

    #[tokio::test]
    async fn is_ready_is_true_if_any_port_is_ready() {
        let registry = PortRegistry::new();
        registry.register(stub("a")).unwrap();
        registry.register(stub("b")).unwrap();
        registry.connect("b").await.unwrap();
        assert!(registry.is_ready());
    }

    #[tokio::test]
    async fn is_subscribed_is_true_if_any_port_is_subscribed() {
        let registry = PortRegistry::new();
        registry.register(stub("a")).unwrap();
        assert!(!registry.is_subscribed());
        registry.subscribe_all(Arc::new(|_event: PortEvent| {})).await;
        assert!(registry.is_subscribed());
    }

    #[tokio::test]
    async fn unsubscribe_all_calls_unsubscribe_on_subscribable_ports() {
        let registry = PortRegistry::new();
        registry.register(stub("a")).unwrap();
        registry.subscribe_all(Arc::new(|_event: PortEvent| {})).await;
        assert!(registry.is_subscribed());
        registry.unsubscribe_all().await;
        assert!(!registry.is_subscribed());
    }
}
