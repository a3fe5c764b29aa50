//! # Event Hub — Testing
//!
//! Test doubles and fixtures for building against the event hub without a
//! real broker or wall clock.
//!
//! This crate provides:
//! - [`mocks::ManualClock`]: a [`Clock`] a test advances by hand
//! - [`mocks::InMemoryBrokerPort`]: a [`BrokerPort`] that loops events back
//!   through its own listener instead of talking to a broker
//! - [`fixtures`]: builders for a hub that's already `Running`
//!
//! ## Example
//!
//! ```
//! use eventhub_testing::fixtures::running_hub;
//!
//! let hub = running_hub::<u32>("orders-hub");
//! assert_eq!(hub.name(), "orders-hub");
//! ```

/// Mock implementations of [`eventhub_core::Clock`] and
/// [`eventhub_core::BrokerPort`].
pub mod mocks {
    use eventhub_core::broker_port::{BoxFuture, BrokerPort, BrokerPortBase, InboundHandler, PortEvent, PortMetrics};
    use eventhub_core::clock::Clock;
    use eventhub_core::error::HubError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// A clock a test advances by hand, rather than one tied to the wall
    /// clock. Starts at an arbitrary fixed instant so timestamp-ordering
    /// assertions don't depend on when the test happens to run.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicU64,
    }

    impl ManualClock {
        /// Construct a clock starting at `start` millis since epoch.
        #[must_use]
        pub const fn new(start: u64) -> Self {
            Self { millis: AtomicU64::new(start) }
        }

        /// Advance the clock by `delta` millis.
        pub fn advance(&self, delta: u64) {
            self.millis.fetch_add(delta, Ordering::Relaxed);
        }

        /// Jump the clock to an absolute millis value.
        pub fn set(&self, millis: u64) {
            self.millis.store(millis, Ordering::Relaxed);
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            // 2025-01-01T00:00:00Z
            Self::new(1_735_689_600_000)
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.millis.load(Ordering::Relaxed)
        }
    }

    /// A broker port backed by memory instead of a network connection.
    ///
    /// `publish` records the event in [`InMemoryBrokerPort::published`]; if
    /// constructed with [`InMemoryBrokerPort::with_loopback`], it also hands
    /// the event straight to the port's own registered listener, simulating
    /// an external broker that echoes back whatever it's sent. Tests that
    /// want to simulate a message arriving from elsewhere should call
    /// [`InMemoryBrokerPort::deliver`] directly instead.
    pub struct InMemoryBrokerPort {
        base: Arc<BrokerPortBase>,
        name: String,
        published: Mutex<Vec<PortEvent>>,
        loopback: bool,
    }

    impl InMemoryBrokerPort {
        /// Construct a port that records publishes but does not echo them.
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                base: Arc::new(BrokerPortBase::new()),
                name: name.into(),
                published: Mutex::new(Vec::new()),
                loopback: false,
            }
        }

        /// Construct a port that also hands every published event straight
        /// to its own registered listener, as if an external broker echoed
        /// it straight back.
        #[must_use]
        pub fn with_loopback(name: impl Into<String>) -> Self {
            Self {
                loopback: true,
                ..Self::new(name)
            }
        }

        /// Every event handed to [`BrokerPort::publish`] so far, in order.
        #[must_use]
        pub fn published(&self) -> Vec<PortEvent> {
            self.published.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
        }

        /// Simulate an inbound event arriving from the external broker,
        /// delivering it to whatever listener [`BrokerPort::subscribe`]
        /// registered.
        pub fn deliver(&self, event: PortEvent) {
            self.base.handle_incoming_event(event);
        }
    }

    impl BrokerPort for InMemoryBrokerPort {
        fn name(&self) -> &str {
            &self.name
        }

        fn port_type(&self) -> &str {
            "in-memory"
        }

        fn connect(&self) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.base.set_connected(true);
                Ok(())
            })
        }

        fn disconnect(&self) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.base.clear_listener();
                self.base.set_connected(false);
                Ok(())
            })
        }

        fn publish(&self, event: &PortEvent) -> BoxFuture<'_, Result<(), HubError>> {
            let event = event.clone();
            Box::pin(async move {
                if !self.base.is_connected() {
                    return Err(HubError::InvalidState {
                        operation: "publish",
                        detail: format!("port '{}' is not connected", self.name),
                    });
                }
                self.published.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(event.clone());
                self.base.record_publish(true, 0);
                if self.loopback {
                    self.base.handle_incoming_event(event);
                }
                Ok(())
            })
        }

        fn subscribe(&self, listener: InboundHandler) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
                self.base.set_listener(listener);
                Ok(())
            })
        }

        fn unsubscribe(&self) -> BoxFuture<'_, Result<(), HubError>> {
            Box::pin(async move {
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

}

/// Builders for a hub that's already past `Uninitialized`, so tests don't
/// repeat the same three setup calls.
pub mod fixtures {
    use eventhub_core::config::HubConfig;
    use eventhub_runtime::EventHub;

    /// Construct a hub named `name`, already `initialize`d and `start`ed.
    ///
    /// # Panics
    ///
    /// Panics if `name` fails [`HubConfig::new`]'s validation, or if the
    /// lifecycle transitions fail — both are programmer errors in a test,
    /// not conditions a test should need to handle gracefully.
    #[must_use]
    pub fn running_hub<D: Clone + Send + Sync + 'static>(name: &str) -> EventHub<D> {
        let hub = EventHub::new(HubConfig::new(name).expect("valid hub name"));
        hub.initialize().expect("uninitialized hub initializes");
        hub.start().expect("initialized hub starts");
        hub
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use eventhub_runtime::HubState;

        #[test]
        fn running_hub_is_ready_for_create_queue() {
            let hub = running_hub::<u32>("fixture-hub");
            assert_eq!(hub.state(), HubState::Running);
        }
    }
}
