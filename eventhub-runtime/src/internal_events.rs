//! Hub-lifecycle notifications — a small synchronous fan-out distinct from
//! [`crate::topic::Topic`], which carries user payloads. Listeners here
//! receive typed [`HubEvent`]s describing what the hub itself is doing,
//! registered and removed via `EventHub::on_internal`/`EventHub::off_internal`,
//! keyed by [`HubEvent::event_type`].

use eventhub_core::error::HubError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A hub-lifecycle notification.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A queue was created and started.
    QueueCreated {
        /// The queue's name.
        name: String,
    },
    /// A queue was stopped and removed.
    QueueDeleted {
        /// The queue's name.
        name: String,
    },
    /// A topic was created.
    TopicCreated {
        /// The topic's name.
        name: String,
    },
    /// A topic was removed.
    TopicDeleted {
        /// The topic's name.
        name: String,
    },
    /// A consumer was registered on a queue.
    ConsumerRegistered {
        /// The queue the consumer was registered on.
        queue: String,
        /// The consumer's id.
        consumer_id: String,
    },
    /// A consumer was stopped.
    ConsumerStopped {
        /// The queue the consumer was registered on.
        queue: String,
        /// The consumer's id.
        consumer_id: String,
    },
    /// A broker port connected successfully.
    PortConnected {
        /// The port's name.
        name: String,
    },
    /// A broker port disconnected.
    PortDisconnected {
        /// The port's name.
        name: String,
    },
    /// An event exhausted its retry budget and was dropped.
    DeliveryFailed {
        /// The queue the event was on.
        queue: String,
        /// The event's id.
        event_id: String,
        /// The last recorded failure reason.
        detail: String,
    },
    /// The hub's lifecycle state changed.
    StateChanged {
        /// The prior state, formatted with `Debug`.
        from: String,
        /// The new state, formatted with `Debug`.
        to: String,
    },
}

impl HubEvent {
    /// The event-type tag a listener registers against in
    /// [`InternalEventBus::on_internal`].
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::QueueCreated { .. } => "queue.created",
            Self::QueueDeleted { .. } => "queue.deleted",
            Self::TopicCreated { .. } => "topic.created",
            Self::TopicDeleted { .. } => "topic.deleted",
            Self::ConsumerRegistered { .. } => "consumer.registered",
            Self::ConsumerStopped { .. } => "consumer.stopped",
            Self::PortConnected { .. } => "port.connected",
            Self::PortDisconnected { .. } => "port.disconnected",
            Self::DeliveryFailed { .. } => "delivery.failed",
            Self::StateChanged { .. } => "state.changed",
        }
    }
}

/// A listener callback. Invoked synchronously on the emitting thread; keep
/// handlers quick or dispatch your own background work from inside one.
pub type Listener = Arc<dyn Fn(&HubEvent) + Send + Sync>;

struct Entry {
    event_type: String,
    listener: Listener,
}

/// Fan-out registry for [`HubEvent`] notifications, keyed by
/// [`HubEvent::event_type`].
#[derive(Default)]
pub struct InternalEventBus {
    listeners: RwLock<HashMap<String, Entry>>,
}

impl InternalEventBus {
    /// Construct an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for notifications whose `event_type()` equals
    /// `event_type`. Returns the listener's id.
    #[must_use]
    pub fn on_internal(&self, event_type: impl Into<String>, listener: Listener) -> String {
        let id = format!("listener-{}", eventhub_core::generate_event_id());
        self.listeners.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(
            id.clone(),
            Entry {
                event_type: event_type.into(),
                listener,
            },
        );
        id
    }

    /// Remove a listener.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no listener with that id exists.
    pub fn off_internal(&self, listener_id: &str) -> Result<(), HubError> {
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(listener_id)
            .map(|_| ())
            .ok_or_else(|| HubError::NotFound {
                kind: "listener",
                name: listener_id.to_string(),
            })
    }

    /// Notify every listener registered for `event`'s type.
    pub fn emit(&self, event: HubEvent) {
        let event_type = event.event_type();
        let listeners = self.listeners.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        for entry in listeners.values() {
            if entry.event_type == event_type {
                (entry.listener)(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_notifies_every_listener_registered_for_that_type() {
        let bus = InternalEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        bus.on_internal(
            "queue.created",
            Arc::new(move |_event: &HubEvent| {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.on_internal(
            "queue.created",
            Arc::new(move |_event: &HubEvent| {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.emit(HubEvent::QueueCreated { name: "orders".to_string() });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_skips_listeners_registered_for_another_type() {
        let bus = InternalEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        bus.on_internal(
            "topic.created",
            Arc::new(move |_event: &HubEvent| {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.emit(HubEvent::QueueCreated { name: "orders".to_string() });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_internal_removes_the_listener() {
        let bus = InternalEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let id = bus.on_internal(
            "queue.created",
            Arc::new(move |_event: &HubEvent| {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.off_internal(&id).unwrap();
        bus.emit(HubEvent::QueueCreated { name: "orders".to_string() });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_internal_unknown_listener_is_not_found() {
        let bus = InternalEventBus::new();
        assert!(bus.off_internal("missing").is_err());
    }
}
