//! Fan-out pub-sub topic: many independent subscriptions, each delivered
//! the same event concurrently and in isolation from the others. A
//! subscription's filter is treated as untrusted: if it panics, that
//! delivery is skipped (counted in `invalid_filter`) rather than the panic
//! unwinding through `publish`.

use eventhub_core::clock::{system_clock, Clock};
use eventhub_core::config::TopicConfig;
use eventhub_core::error::HubError;
use eventhub_core::event::{Event, Priority};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A subscription handler, invoked with the full event envelope.
pub type Handler<D> = Arc<dyn Fn(Event<D>) -> HandlerFuture + Send + Sync>;
/// A subscription filter: return `false` to skip delivery for this event.
pub type Filter<D> = Arc<dyn Fn(&Event<D>) -> bool + Send + Sync>;

struct Subscription<D> {
    handler: Handler<D>,
    filter: Option<Filter<D>>,
    /// Removed after its first matching delivery.
    once: bool,
}

/// Options controlling [`Topic::subscribe`].
#[derive(Default)]
pub struct SubscribeOptions<D> {
    /// Only deliver events for which this returns `true`.
    pub filter: Option<Filter<D>>,
    /// Unsubscribe automatically after the first matching delivery.
    pub once: bool,
}

/// Snapshot metrics for a single topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicMetrics {
    /// Successful `publish` calls.
    pub messages_published: u64,
    /// Sum of deliveries across all subscriptions (one publish with three
    /// matching subscribers counts as three).
    pub total_deliveries: u64,
    /// Events dropped for having outlived `ttl_ms` before delivery.
    pub dropped_expired: u64,
    /// Times a subscription's filter panicked instead of returning a
    /// `bool`; treated as a non-match for that delivery.
    pub invalid_filter: u64,
    /// Subscriptions currently registered.
    pub active_subscriptions: usize,
    /// Millis since epoch of the last publish.
    pub last_activity: Option<u64>,
}

#[derive(Default)]
struct MetricsInner {
    messages_published: AtomicU64,
    total_deliveries: AtomicU64,
    dropped_expired: AtomicU64,
    invalid_filter: AtomicU64,
    last_activity: AtomicU64,
}

impl MetricsInner {
    fn snapshot(&self, active_subscriptions: usize) -> TopicMetrics {
        let last_activity = match self.last_activity.load(Ordering::Relaxed) {
            0 => None,
            millis => Some(millis),
        };
        TopicMetrics {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            total_deliveries: self.total_deliveries.load(Ordering::Relaxed),
            dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
            invalid_filter: self.invalid_filter.load(Ordering::Relaxed),
            active_subscriptions,
            last_activity,
        }
    }
}

struct TopicShared<D> {
    name: String,
    config: TopicConfig,
    subscriptions: RwLock<HashMap<String, Subscription<D>>>,
    metrics: MetricsInner,
    clock: Arc<dyn Clock>,
}

/// A named pub-sub topic. Cheaply cloneable; clones share subscriptions and
/// metrics.
pub struct Topic<D> {
    inner: Arc<TopicShared<D>>,
}

impl<D> Clone for Topic<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<D> std::fmt::Debug for Topic<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic").field("name", &self.inner.name).finish_non_exhaustive()
    }
}

impl<D: Clone + Send + Sync + 'static> Topic<D> {
    /// Construct a topic using the system clock.
    #[must_use]
    pub fn new(config: TopicConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Construct a topic with an injected clock, for deterministic ttl
    /// tests.
    #[must_use]
    pub fn with_clock(config: TopicConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(TopicShared {
                name: config.name.clone(),
                config,
                subscriptions: RwLock::new(HashMap::new()),
                metrics: MetricsInner::default(),
                clock,
            }),
        }
    }

    /// The topic's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The topic's configuration.
    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        &self.inner.config
    }

    /// Register a subscription and return its id.
    #[must_use]
    pub fn subscribe(&self, handler: Handler<D>, options: SubscribeOptions<D>) -> String {
        let id = format!("sub-{}", eventhub_core::generate_event_id());
        let subscription = Subscription {
            handler,
            filter: options.filter,
            once: options.once,
        };
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.clone(), subscription);
        id
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no subscription with that id
    /// exists.
    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), HubError> {
        let removed = self
            .inner
            .subscriptions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(subscription_id);
        if removed.is_some() {
            Ok(())
        } else {
            Err(HubError::NotFound {
                kind: "subscription",
                name: subscription_id.to_string(),
            })
        }
    }

    /// Ids of every active subscription.
    #[must_use]
    pub fn list_subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Broadcast `data` to every subscription whose filter matches,
    /// dispatching each delivery on its own task so a slow or panicking
    /// subscriber can't block or poison the others. Returns the number of
    /// subscriptions the event was handed to.
    ///
    /// If the topic has a `ttl_ms`, an event older than that by the time it
    /// would be delivered is dropped (counted in `dropped_expired`) rather
    /// than delivered.
    pub fn publish(&self, data: D, priority: Option<Priority>) -> usize {
        let mut event = Event::new("topic.message", self.inner.name.clone(), data);
        if let Some(priority) = priority {
            event.priority = priority;
        }

        let now = self.inner.clock.now_millis();
        if let Some(ttl_ms) = self.inner.config.ttl_ms {
            if now.saturating_sub(event.timestamp) > ttl_ms {
                self.inner.metrics.dropped_expired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic = %self.inner.name, "event expired before delivery");
                return 0;
            }
        }

        self.inner.metrics.messages_published.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.last_activity.store(now, Ordering::Relaxed);
        metrics::counter!("eventhub_topic_messages_published_total", "topic" => self.inner.name.clone())
            .increment(1);

        let mut once_ids = Vec::new();
        let mut delivered = 0usize;
        {
            let subscriptions = self.inner.subscriptions.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (id, subscription) in subscriptions.iter() {
                if let Some(filter) = &subscription.filter {
                    let matches = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| filter(&event)));
                    match matches {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(_) => {
                            self.inner.metrics.invalid_filter.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(topic = %self.inner.name, subscription = %id, "filter panicked; treating as non-match");
                            continue;
                        }
                    }
                }
                delivered += 1;
                if subscription.once {
                    once_ids.push(id.clone());
                }
                let fut = (subscription.handler)(event.clone());
                tokio::spawn(fut);
            }
        }
        self.inner.metrics.total_deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        metrics::counter!("eventhub_topic_deliveries_total", "topic" => self.inner.name.clone())
            .increment(delivered as u64);

        if !once_ids.is_empty() {
            let mut subscriptions = self.inner.subscriptions.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            for id in once_ids {
                subscriptions.remove(&id);
            }
        }

        tracing::trace!(topic = %self.inner.name, event = %event.id, delivered, "event published");
        delivered
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> TopicMetrics {
        let active = self.inner.subscriptions.read().unwrap_or_else(std::sync::PoisonError::into_inner).len();
        self.inner.metrics.snapshot(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhub_core::clock::system_clock;
    use tokio::sync::mpsc;

    fn topic() -> Topic<u32> {
        Topic::new(TopicConfig::new("user-activity").unwrap())
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let topic = topic();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel::<u32>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<u32>();
        topic.subscribe(
            Arc::new(move |e: Event<u32>| {
                let tx = tx_a.clone();
                Box::pin(async move {
                    let _ = tx.send(e.data);
                })
            }),
            SubscribeOptions::default(),
        );
        topic.subscribe(
            Arc::new(move |e: Event<u32>| {
                let tx = tx_b.clone();
                Box::pin(async move {
                    let _ = tx.send(e.data);
                })
            }),
            SubscribeOptions::default(),
        );

        let delivered = topic.publish(42, None);
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await, Some(42));
        assert_eq!(rx_b.recv().await, Some(42));
        assert_eq!(topic.metrics().messages_published, 1);
        assert_eq!(topic.metrics().total_deliveries, 2);
    }

    #[tokio::test]
    async fn filter_skips_non_matching_events() {
        let topic = topic();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        topic.subscribe(
            Arc::new(move |e: Event<u32>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(e.data);
                })
            }),
            SubscribeOptions {
                filter: Some(Arc::new(|e: &Event<u32>| e.data > 10)),
                once: false,
            },
        );

        assert_eq!(topic.publish(1, None), 0);
        assert_eq!(topic.publish(20, None), 1);
        assert_eq!(rx.recv().await, Some(20));
    }

    #[tokio::test]
    async fn panicking_filter_is_treated_as_non_match() {
        let topic = topic();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        topic.subscribe(
            Arc::new(move |e: Event<u32>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(e.data);
                })
            }),
            SubscribeOptions {
                filter: Some(Arc::new(|_: &Event<u32>| unreachable!("filter should never be reached"))),
                once: false,
            },
        );

        assert_eq!(topic.publish(1, None), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(topic.metrics().invalid_filter, 1);
    }

    #[tokio::test]
    async fn once_subscription_is_removed_after_first_delivery() {
        let topic = topic();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        topic.subscribe(
            Arc::new(move |e: Event<u32>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send(e.data);
                })
            }),
            SubscribeOptions { filter: None, once: true },
        );

        assert_eq!(topic.publish(1, None), 1);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(topic.publish(2, None), 0);
        assert_eq!(topic.list_subscriptions().len(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_not_found() {
        let topic = topic();
        let err = topic.unsubscribe("missing").unwrap_err();
        assert!(matches!(err, HubError::NotFound { .. }));
    }

    #[tokio::test]
    async fn ttl_drops_stale_events() {
        let clock = eventhub_testing_clock_stub();
        let config = TopicConfig::new("expiring").unwrap().with_ttl_ms(1).unwrap();
        let topic = Topic::with_clock(config, clock.clone());
        clock.advance(1_000);
        let delivered = topic.publish(1, None);
        assert_eq!(delivered, 0);
        assert_eq!(topic.metrics().dropped_expired, 1);
    }

    // A tiny local clock stub, so this crate's tests don't depend on
    // `eventhub-testing` (which itself depends on this crate).
    fn eventhub_testing_clock_stub() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(system_clock().now_millis()))
    }

    struct ManualClock {
        millis: std::sync::atomic::AtomicU64,
    }

    impl ManualClock {
        fn new(start: u64) -> Self {
            Self { millis: std::sync::atomic::AtomicU64::new(start) }
        }

        fn advance(&self, delta: u64) {
            self.millis.fetch_add(delta, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.millis.load(Ordering::Relaxed)
        }
    }
}
