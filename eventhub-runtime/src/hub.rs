//! [`EventHub`] — the façade tying queues, topics, broker ports, and
//! internal notifications together behind one lifecycle state machine.

use crate::event_bus::{self, EventBus};
use crate::internal_events::{HubEvent, InternalEventBus, Listener};
use crate::port_registry::PortRegistry;
use crate::queue::Queue;
use crate::queue_manager::QueueManager;
use crate::topic::Topic;
use crate::topic_manager::TopicManager;
use eventhub_core::broker_port::BrokerPort;
use eventhub_core::clock::{system_clock, Clock};
use eventhub_core::config::{HubConfig, QueueConfig, TopicConfig};
use eventhub_core::error::HubError;
use eventhub_core::event::{Event, Priority};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Options controlling [`EventHub::publish`].
#[derive(Default)]
pub struct PublishOptions {
    /// Override priority (defaults to [`Priority::Normal`]).
    pub priority: Option<Priority>,
    /// Optional tracing token.
    pub correlation_id: Option<String>,
    /// Free-form key/value bag merged into the event's metadata.
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// Lifecycle of a hub: `Uninitialized -> Initialized -> Running -> Stopping
/// -> Stopped`. `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Constructed but not yet initialized.
    Uninitialized,
    /// Initialized; queues/topics/ports may be registered but nothing is
    /// running yet.
    Initialized,
    /// Accepting sends/publishes/deliveries.
    Running,
    /// Draining: no longer accepting new work, waiting for in-flight work
    /// to settle.
    Stopping,
    /// Fully stopped.
    Stopped,
    /// An unrecoverable error occurred; every operation now fails.
    Failed,
}

impl HubState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initialized => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Stopped => 4,
            Self::Failed => 5,
        }
    }
}

/// Aggregate metrics across every resource a hub owns.
#[derive(Debug, Clone)]
pub struct HubMetrics {
    /// Current lifecycle state.
    pub state: HubState,
    /// Number of registered queues.
    pub queue_count: usize,
    /// Number of registered topics.
    pub topic_count: usize,
    /// Number of registered broker ports.
    pub port_count: usize,
    /// Milliseconds since the hub was constructed.
    pub uptime_ms: u64,
}

struct HubShared<D> {
    config: HubConfig,
    state: AtomicU8,
    created_at_ms: u64,
    queues: QueueManager<D>,
    topics: TopicManager<D>,
    ports: PortRegistry,
    events: InternalEventBus,
    bus: EventBus<D>,
    clock: Arc<dyn Clock>,
}

/// The entry point of this workspace: one named hub owning queues, topics,
/// and broker ports, all sharing one clock and one internal-event stream.
/// Cheaply cloneable; clones share all state.
pub struct EventHub<D> {
    inner: Arc<HubShared<D>>,
}

impl<D> Clone for EventHub<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<D: Clone + Send + Sync + 'static> EventHub<D> {
    /// Construct a hub in the `Uninitialized` state, using the system
    /// clock.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Construct a hub with an injected clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(config: HubConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(HubShared {
                config,
                state: AtomicU8::new(HubState::Uninitialized.as_u8()),
                created_at_ms: clock.now_millis(),
                queues: QueueManager::new(clock.clone()),
                topics: TopicManager::new(clock.clone()),
                ports: PortRegistry::new(),
                events: InternalEventBus::new(),
                bus: EventBus::new(clock.clone()),
                clock,
            }),
        }
    }

    /// The hub's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The hub's configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HubState {
        HubState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: HubState) {
        let from = self.state();
        self.inner.state.store(state.as_u8(), Ordering::Release);
        tracing::info!(hub = %self.name(), from = ?from, to = ?state, "hub state transition");
        metrics::gauge!("eventhub_hub_state", "hub" => self.name().to_string()).set(f64::from(state.as_u8()));
        self.inner.events.emit(HubEvent::StateChanged {
            from: format!("{from:?}"),
            to: format!("{state:?}"),
        });
    }

    fn require_state(&self, required: HubState, operation: &'static str) -> Result<(), HubError> {
        let current = self.state();
        if current == required {
            Ok(())
        } else {
            Err(HubError::InvalidState {
                operation,
                detail: format!("hub '{}' requires state {required:?}, found {current:?}", self.name()),
            })
        }
    }

    fn require_running(&self, operation: &'static str) -> Result<(), HubError> {
        self.require_state(HubState::Running, operation)
    }

    /// Transition `Uninitialized -> Initialized`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] unless the hub is currently
    /// `Uninitialized`.
    pub fn initialize(&self) -> Result<(), HubError> {
        self.require_state(HubState::Uninitialized, "initialize")?;
        self.set_state(HubState::Initialized);
        Ok(())
    }

    /// Transition `Initialized -> Running`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] unless the hub is currently
    /// `Initialized`.
    pub fn start(&self) -> Result<(), HubError> {
        self.require_state(HubState::Initialized, "start")?;
        self.set_state(HubState::Running);
        Ok(())
    }

    /// Transition `Running -> Stopping -> Stopped`: stop accepting new
    /// work, drain every queue (bounded by `shutdown_deadline_ms`), and
    /// disconnect every broker port.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] unless the hub is currently
    /// `Running`.
    pub async fn stop(&self) -> Result<(), HubError> {
        self.require_state(HubState::Running, "stop")?;
        self.set_state(HubState::Stopping);

        let deadline = Duration::from_millis(self.inner.config.shutdown_deadline_ms);
        let timed_out = self.inner.queues.stop_all(deadline).await;
        self.inner.ports.disconnect_all().await;

        if !timed_out.is_empty() {
            tracing::error!(hub = %self.name(), queues = ?timed_out, "shutdown deadline exceeded");
            self.set_state(HubState::Failed);
            return Err(HubError::Timeout {
                operation: "stop",
                elapsed_ms: self.inner.config.shutdown_deadline_ms,
            });
        }

        self.set_state(HubState::Stopped);
        Ok(())
    }

    /// Force the hub into `Failed`. Reachable from any non-terminal state;
    /// every subsequent operation fails with `InvalidState`.
    pub fn fail(&self, reason: &str) {
        tracing::error!(hub = %self.name(), reason, "hub failed");
        self.set_state(HubState::Failed);
    }

    /// Create and start a new queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] if the hub isn't `Running`, or
    /// [`HubError::AlreadyExists`] if the queue name is taken.
    pub fn create_queue(&self, config: QueueConfig) -> Result<Queue<D>, HubError> {
        self.require_running("create_queue")?;
        let name = config.name.clone();
        let queue = self.inner.queues.create(config)?;
        self.inner.events.emit(HubEvent::QueueCreated { name });
        Ok(queue)
    }

    /// Look up a queue by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no queue with that name exists.
    pub fn get_queue(&self, name: &str) -> Result<Queue<D>, HubError> {
        self.inner.queues.get(name)
    }

    /// Names of every registered queue.
    #[must_use]
    pub fn list_queues(&self) -> Vec<String> {
        self.inner.queues.list()
    }

    /// Stop and remove a queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no queue with that name exists.
    pub async fn delete_queue(&self, name: &str) -> Result<(), HubError> {
        let deadline = Duration::from_millis(self.inner.config.shutdown_deadline_ms);
        self.inner.queues.delete(name, deadline).await?;
        self.inner.events.emit(HubEvent::QueueDeleted { name: name.to_string() });
        Ok(())
    }

    /// Create a new topic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] if the hub isn't `Running`, or
    /// [`HubError::AlreadyExists`] if the topic name is taken.
    pub fn create_topic(&self, config: TopicConfig) -> Result<Topic<D>, HubError> {
        self.require_running("create_topic")?;
        let name = config.name.clone();
        let topic = self.inner.topics.create(config)?;
        self.inner.events.emit(HubEvent::TopicCreated { name });
        Ok(topic)
    }

    /// Look up a topic by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no topic with that name exists.
    pub fn get_topic(&self, name: &str) -> Result<Topic<D>, HubError> {
        self.inner.topics.get(name)
    }

    /// Names of every registered topic.
    #[must_use]
    pub fn list_topics(&self) -> Vec<String> {
        self.inner.topics.list_topics()
    }

    /// Remove a topic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no topic with that name exists.
    pub fn delete_topic(&self, name: &str) -> Result<(), HubError> {
        self.inner.topics.delete(name)?;
        self.inner.events.emit(HubEvent::TopicDeleted { name: name.to_string() });
        Ok(())
    }

    /// Register a broker port.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyExists`] if a port with that name is
    /// already registered.
    pub fn register_port(&self, port: Arc<dyn BrokerPort>) -> Result<(), HubError> {
        self.inner.ports.register(port)
    }

    /// Connect to a previously registered external broker by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `name` was never registered
    /// (unregistered names are never implicitly created).
    pub async fn connect_to_external_broker(&self, name: &str) -> Result<(), HubError> {
        self.inner.ports.connect(name).await?;
        self.inner.events.emit(HubEvent::PortConnected { name: name.to_string() });
        Ok(())
    }

    /// Disconnect a named external broker.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `name` isn't registered.
    pub async fn disconnect_external_broker(&self, name: &str) -> Result<(), HubError> {
        self.inner.ports.disconnect(name).await?;
        self.inner.events.emit(HubEvent::PortDisconnected { name: name.to_string() });
        Ok(())
    }

    /// Publish an event to every registered, ready broker port.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DeliveryFailed`] if any port failed; succeeds
    /// once the event is handed off locally even if no ports are
    /// registered.
    pub async fn publish_to_external_brokers(&self, event: &eventhub_core::Event<D>) -> Result<(), HubError>
    where
        D: serde::Serialize,
    {
        self.inner.ports.publish_all(event).await
    }

    /// Register a listener for hub-lifecycle notifications of type
    /// `event_type` (see [`HubEvent::event_type`]). Distinct from
    /// [`EventHub::on`], which carries user-published payloads rather than
    /// lifecycle notifications.
    #[must_use]
    pub fn on_internal(&self, event_type: impl Into<String>, listener: Listener) -> String {
        self.inner.events.on_internal(event_type, listener)
    }

    /// Remove a lifecycle listener.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no listener with that id exists.
    pub fn off_internal(&self, listener_id: &str) -> Result<(), HubError> {
        self.inner.events.off_internal(listener_id)
    }

    /// Emit a fully-formed event to every [`EventHub::on`] listener whose
    /// registered type matches `event.event_type`. Returns the number of
    /// listeners the event was handed to.
    pub fn emit(&self, event: Event<D>) -> usize {
        self.inner.bus.emit(event)
    }

    /// Build and emit an event in one step.
    ///
    /// Unlike [`crate::topic::Topic`], this doesn't require a `create_topic`
    /// step first: any `event_type` string can be published and matched
    /// against by [`EventHub::on`] directly.
    pub fn publish(&self, event_type: impl Into<String>, data: D, source: Option<String>, options: PublishOptions) -> usize {
        let mut event = Event::new(event_type, source.unwrap_or_else(|| self.name().to_string()), data);
        if let Some(priority) = options.priority {
            event = event.with_priority(priority);
        }
        if let Some(correlation_id) = options.correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(metadata) = options.metadata {
            event = event.with_metadata(metadata);
        }
        self.emit(event)
    }

    /// Register `handler` for events whose `event_type` equals `event_type`,
    /// separate from named [`crate::topic::Topic`]s: no `create_topic` call
    /// is needed first. Returns the subscription handle.
    pub fn on(&self, event_type: impl Into<String>, handler: event_bus::Handler<D>, options: event_bus::OnOptions<D>) -> event_bus::Subscription {
        self.inner.bus.on(event_type, handler, options)
    }

    /// Remove a subscription registered via [`EventHub::on`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no subscription with that id
    /// exists.
    pub fn off(&self, subscription_id: &str) -> Result<(), HubError> {
        self.inner.bus.off(subscription_id)
    }

    /// Aggregate metrics across every queue, topic, and port the hub owns.
    #[must_use]
    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            state: self.state(),
            queue_count: self.inner.queues.list().len(),
            topic_count: self.inner.topics.list_topics().len(),
            port_count: self.inner.ports.list().len(),
            uptime_ms: self.inner.clock.now_millis().saturating_sub(self.inner.created_at_ms),
        }
    }
}
