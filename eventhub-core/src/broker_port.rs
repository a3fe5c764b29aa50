//! The broker-port ABI: a pluggable boundary to an external message broker.
//!
//! A port is "anything with `{connect, disconnect, publish, subscribe,
//! is_ready}`" — capability-set polymorphism, not an inheritance hierarchy.
//! The hub treats concrete adapters as opaque `Arc<dyn BrokerPort>` trait
//! objects; this module defines the trait, the wire-level event shape ports
//! exchange, and [`BrokerPortBase`], a small struct concrete adapters embed
//! to get `connected`/`subscribed` tracking and metrics for free.

use crate::error::HubError;
use crate::event::{now_millis, Event, Priority};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// A boxed, `Send` future — used throughout this trait so that it stays
/// object-safe (`Arc<dyn BrokerPort>`), the same technique
/// `composable_rust_core::event_bus::EventBus` uses for the same reason.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Listener registered via [`BrokerPort::subscribe`] for inbound events.
pub type InboundHandler = std::sync::Arc<dyn Fn(PortEvent) + Send + Sync>;

/// The wire-level event shape exchanged with a broker port.
///
/// This is the adapter-facing counterpart of [`Event`](crate::event::Event):
/// the payload is opaque bytes (`payload`) rather than a typed `D`, since an
/// external broker has no notion of the host application's payload type.
/// [`PortEvent::from_event`]/[`PortEvent::into_event`] convert between the
/// two via JSON, the default (and simplest) of the `serialization` choices
/// in [`crate::config::Serialization`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEvent {
    /// Mirrors [`Event::id`].
    pub id: String,
    /// Mirrors [`Event::event_type`].
    pub event_type: String,
    /// Mirrors [`Event::timestamp`].
    pub timestamp: u64,
    /// Mirrors [`Event::source`].
    pub source: String,
    /// Mirrors [`Event::priority`].
    pub priority: Priority,
    /// JSON-encoded payload bytes.
    pub payload: Vec<u8>,
    /// Mirrors [`Event::correlation_id`].
    pub correlation_id: Option<String>,
}

impl PortEvent {
    /// Serialize an [`Event`] to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] if `data` cannot be encoded as
    /// JSON.
    pub fn from_event<D: Serialize>(event: &Event<D>) -> Result<Self, HubError> {
        let payload = serde_json::to_vec(&event.data).map_err(|e| HubError::ValidationFailed {
            operation: "PortEvent::from_event",
            detail: format!("payload is not JSON-serializable: {e}"),
        })?;
        Ok(Self {
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            source: event.source.clone(),
            priority: event.priority,
            payload,
            correlation_id: event.correlation_id.clone(),
        })
    }

    /// Deserialize this wire event back into an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ValidationFailed`] if `payload` cannot be decoded
    /// as `D`.
    pub fn into_event<D: DeserializeOwned>(self) -> Result<Event<D>, HubError> {
        let data: D = serde_json::from_slice(&self.payload).map_err(|e| HubError::ValidationFailed {
            operation: "PortEvent::into_event",
            detail: format!("payload does not decode to the expected type: {e}"),
        })?;
        Ok(Event {
            id: self.id,
            event_type: self.event_type,
            timestamp: self.timestamp,
            source: self.source,
            priority: self.priority,
            data,
            correlation_id: self.correlation_id,
            metadata: std::collections::BTreeMap::new(),
        })
    }
}

/// Point-in-time metrics snapshot for a single port.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortMetrics {
    /// Successful outbound publishes.
    pub total_published: u64,
    /// Inbound events handed to a subscriber.
    pub total_received: u64,
    /// Failed publishes or subscription callbacks.
    pub total_failed: u64,
    /// Rolling average publish latency.
    pub average_latency_ms: f64,
    /// Millis since epoch of the last publish or receive, if any.
    pub last_activity: Option<u64>,
    /// Milliseconds since the port was constructed.
    pub uptime_ms: u64,
}

/// Shared state concrete adapters embed to get `connected`/`subscribed`
/// tracking and per-port metrics without re-implementing them. Adapters
/// call [`BrokerPortBase::record_publish`] around their `do_publish`, and
/// [`BrokerPortBase::handle_incoming_event`] from their inbound callback.
pub struct BrokerPortBase {
    created_at_ms: u64,
    connected: AtomicBool,
    subscribed: AtomicBool,
    total_published: AtomicU64,
    total_received: AtomicU64,
    total_failed: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    last_activity: AtomicU64,
    listener: Mutex<Option<InboundHandler>>,
}

impl BrokerPortBase {
    /// Create a fresh, disconnected base.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at_ms: now_millis(),
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            total_published: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            last_activity: AtomicU64::new(0),
            listener: Mutex::new(None),
        }
    }

    /// Whether the adapter is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether an inbound listener is registered.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Mark the port connected. Idempotent.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Register the inbound listener and mark subscribed.
    pub fn set_listener(&self, handler: InboundHandler) {
        *self.listener.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handler);
        self.subscribed.store(true, Ordering::Release);
    }

    /// Clear the inbound listener and mark unsubscribed.
    pub fn clear_listener(&self) {
        *self.listener.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        self.subscribed.store(false, Ordering::Release);
    }

    /// Record the outcome of a publish attempt, in milliseconds of latency.
    pub fn record_publish(&self, success: bool, latency_ms: u64) {
        if success {
            self.total_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.last_activity.store(now_millis(), Ordering::Relaxed);
    }

    /// Hand an inbound wire event to the registered listener, incrementing
    /// `total_received`. A no-op (not an error) if nothing is subscribed,
    /// since delivery here is best-effort from the adapter's perspective.
    pub fn handle_incoming_event(&self, event: PortEvent) {
        self.last_activity.store(now_millis(), Ordering::Relaxed);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(event);
            self.total_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot current metrics.
    #[must_use]
    pub fn metrics(&self) -> PortMetrics {
        let count = self.latency_count.load(Ordering::Relaxed);
        let average_latency_ms = if count == 0 {
            0.0
        } else {
            self.latency_sum_ms.load(Ordering::Relaxed) as f64 / count as f64
        };
        let last_activity = match self.last_activity.load(Ordering::Relaxed) {
            0 => None,
            millis => Some(millis),
        };
        PortMetrics {
            total_published: self.total_published.load(Ordering::Relaxed),
            total_received: self.total_received.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            average_latency_ms,
            last_activity,
            uptime_ms: now_millis().saturating_sub(self.created_at_ms),
        }
    }
}

impl Default for BrokerPortBase {
    fn default() -> Self {
        Self::new()
    }
}

/// An adapter to an external message broker.
///
/// `connect`/`disconnect` must be idempotent: calling either while already
/// in the target state is a no-op success. `publish_batch`'s default
/// implementation attempts every message and returns a composite
/// [`HubError::DeliveryFailed`] listing the first failure if any message
/// fails; adapters with a genuine batch API should override it.
pub trait BrokerPort: Send + Sync {
    /// Unique name within the owning hub.
    fn name(&self) -> &str;

    /// Adapter type tag, e.g. `"redpanda"`, `"in-memory"`.
    fn port_type(&self) -> &str;

    /// Connect to the external broker. Idempotent.
    fn connect(&self) -> BoxFuture<'_, Result<(), HubError>>;

    /// Disconnect from the external broker. Idempotent.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), HubError>>;

    /// Publish a single event.
    fn publish(&self, event: &PortEvent) -> BoxFuture<'_, Result<(), HubError>>;

    /// Publish a batch of events. Succeeds iff every message succeeds.
    fn publish_batch<'a>(&'a self, events: &'a [PortEvent]) -> BoxFuture<'a, Result<(), HubError>> {
        Box::pin(async move {
            let mut failures = Vec::new();
            for event in events {
                if let Err(e) = self.publish(event).await {
                    failures.push(format!("{}: {e}", event.id));
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                Err(HubError::DeliveryFailed {
                    operation: "publish_batch",
                    detail: format!("{}/{} messages failed: {}", failures.len(), events.len(), failures.join("; ")),
                    cause: None,
                })
            }
        })
    }

    /// Whether this adapter supports inbound subscription at all. The
    /// aggregate subscriber in `eventhub-runtime` treats `false` as a no-op
    /// success rather than an error.
    fn supports_subscribe(&self) -> bool {
        true
    }

    /// Register a single inbound handler for externally originated events.
    fn subscribe(&self, listener: InboundHandler) -> BoxFuture<'_, Result<(), HubError>>;

    /// Remove the inbound handler, if any.
    fn unsubscribe(&self) -> BoxFuture<'_, Result<(), HubError>>;

    /// Non-throwing status probe.
    fn is_ready(&self) -> bool;

    /// Whether an inbound handler is currently registered.
    fn is_subscribed(&self) -> bool;

    /// Current metrics snapshot.
    fn metrics(&self) -> PortMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_event_roundtrips_through_json() {
        let event = Event::new("login", "auth", serde_json::json!({"user": "u1"}));
        let wire = PortEvent::from_event(&event).unwrap();
        assert_eq!(wire.id, event.id);
        let back: Event<serde_json::Value> = wire.into_event().unwrap();
        assert_eq!(back.data, event.data);
    }

    #[test]
    fn base_tracks_connection_and_metrics() {
        let base = BrokerPortBase::new();
        assert!(!base.is_connected());
        base.set_connected(true);
        assert!(base.is_connected());

        base.record_publish(true, 10);
        base.record_publish(false, 20);
        let metrics = base.metrics();
        assert_eq!(metrics.total_published, 1);
        assert_eq!(metrics.total_failed, 1);
        assert_eq!(metrics.average_latency_ms, 15.0);
        assert!(metrics.last_activity.is_some());
    }

    #[test]
    fn base_forwards_incoming_events_to_listener() {
        let base = BrokerPortBase::new();
        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        base.set_listener(std::sync::Arc::new(move |event: PortEvent| {
            received_clone.lock().unwrap().push(event.id);
        }));
        assert!(base.is_subscribed());

        let event = Event::new("x", "hub", 1u32);
        base.handle_incoming_event(PortEvent::from_event(&event).unwrap());
        assert_eq!(received.lock().unwrap().as_slice(), [event.id]);
        assert_eq!(base.metrics().total_received, 1);

        base.clear_listener();
        assert!(!base.is_subscribed());
    }
}
