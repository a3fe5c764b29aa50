//! Type-keyed pub-sub, distinct from [`crate::topic::Topic`]: listeners
//! subscribe to an event-type string directly via [`EventHub::on`]
//! rather than a pre-created, named topic, and [`EventHub::emit`] /
//! [`EventHub::publish`] deliver straight to whatever matches without a
//! `create_topic` step first.
//!
//! [`EventHub::on`]: crate::hub::EventHub::on
//! [`EventHub::emit`]: crate::hub::EventHub::emit
//! [`EventHub::publish`]: crate::hub::EventHub::publish

use eventhub_core::clock::Clock;
use eventhub_core::error::HubError;
use eventhub_core::event::Event;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A subscription handler, invoked with the full event envelope.
pub type Handler<D> = Arc<dyn Fn(Event<D>) -> HandlerFuture + Send + Sync>;
/// A subscription filter: return `false` to skip delivery for this event.
pub type Filter<D> = Arc<dyn Fn(&Event<D>) -> bool + Send + Sync>;

/// Options controlling [`EventBus::on`].
#[derive(Default)]
pub struct OnOptions<D> {
    /// Only deliver events for which this returns `true`.
    pub filter: Option<Filter<D>>,
}

/// The handle returned by [`EventBus::on`].
#[derive(Debug, Clone)]
pub struct Subscription {
    /// The subscription's id, passed to `off` to remove it.
    pub id: String,
    /// The event type this subscription matches.
    pub event_type: String,
    /// Millis since epoch when the subscription was registered.
    pub created_at: u64,
    /// Always `true` for a subscription still present in the registry;
    /// there is no paused state, only registered or removed.
    pub active: bool,
}

struct Entry<D> {
    event_type: String,
    handler: Handler<D>,
    filter: Option<Filter<D>>,
    created_at: u64,
}

/// A type-keyed pub-sub bus: `on(type, ...)` registers a listener for one
/// event type string, `emit`/`publish` deliver to every listener whose type
/// matches.
pub struct EventBus<D> {
    entries: RwLock<HashMap<String, Entry<D>>>,
    clock: Arc<dyn Clock>,
}

impl<D: Clone + Send + Sync + 'static> EventBus<D> {
    /// Construct an empty bus backed by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Register `handler` for events whose `event_type` equals `event_type`.
    /// Returns the subscription handle.
    pub fn on(&self, event_type: impl Into<String>, handler: Handler<D>, options: OnOptions<D>) -> Subscription {
        let event_type = event_type.into();
        let id = format!("sub-{}", eventhub_core::generate_event_id());
        let created_at = self.clock.now_millis();
        self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(
            id.clone(),
            Entry {
                event_type: event_type.clone(),
                handler,
                filter: options.filter,
                created_at,
            },
        );
        Subscription {
            id,
            event_type,
            created_at,
            active: true,
        }
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no subscription with that id
    /// exists.
    pub fn off(&self, subscription_id: &str) -> Result<(), HubError> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| HubError::NotFound {
                kind: "subscription",
                name: subscription_id.to_string(),
            })
    }

    /// Deliver `event` to every listener whose `event_type` matches and
    /// whose filter (if any) passes, each dispatched on its own task.
    /// Returns the number of listeners the event was handed to. A
    /// panicking filter is treated as a non-match rather than unwinding
    /// through `emit`.
    pub fn emit(&self, event: Event<D>) -> usize {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut delivered = 0usize;
        for entry in entries.values() {
            if entry.event_type != event.event_type {
                continue;
            }
            if let Some(filter) = &entry.filter {
                let matches = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| filter(&event)));
                match matches {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => {
                        tracing::warn!(event_type = %event.event_type, "on() filter panicked; treating as non-match");
                        continue;
                    }
                }
            }
            delivered += 1;
            tokio::spawn((entry.handler)(event.clone()));
        }
        delivered
    }

    /// Subscriptions currently registered for `event_type`.
    #[must_use]
    pub fn list_for(&self, event_type: &str) -> Vec<Subscription> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(_, entry)| entry.event_type == event_type)
            .map(|(id, entry)| Subscription {
                id: id.clone(),
                event_type: entry.event_type.clone(),
                created_at: entry.created_at,
                active: true,
            })
            .collect()
    }
}
