//! Point-to-point queue: one [`crate::bus::MessageBus`], at most one active
//! consumer, ack/nack-driven retry.

use crate::bus::{is_ready, FifoBus, MessageBus, PriorityBus};
use eventhub_core::clock::{system_clock, Clock};
use eventhub_core::config::{QueueConfig, StorageType};
use eventhub_core::error::HubError;
use eventhub_core::event::{Event, Priority};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Lifecycle of a single queue: `Created -> Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Constructed but not yet started.
    Created,
    /// Accepting sends and deliveries.
    Running,
    /// No longer accepting sends; in-flight handler calls finish, then the
    /// consumer loop exits.
    Draining,
    /// Fully stopped.
    Stopped,
}

/// Options controlling [`Queue::consume`].
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Retries before an event is dropped with `_finalFailure` set.
    pub max_retries: u32,
    /// Delay before a nacked event becomes eligible again.
    pub retry_delay_ms: u64,
    /// With FIFO storage, whether to deliver in strict enqueue order (has
    /// no effect on priority storage, which always orders by
    /// `(ready_at, priority, timestamp, id)`).
    pub maintain_order: bool,
    /// Ack automatically if the handler returns without calling
    /// `ack`/`nack` itself.
    pub auto_ack: bool,
    /// Cap on the consumer loop's backoff when the bus is empty.
    pub receive_idle_ms: u64,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            maintain_order: true,
            auto_ack: true,
            receive_idle_ms: 50,
        }
    }
}

/// Point-in-time metrics for a single queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueMetrics {
    /// Successful `send` calls.
    pub messages_sent: u64,
    /// Delivery attempts handed to the consumer's handler.
    pub messages_received: u64,
    /// Current bus depth.
    pub in_queue: usize,
    /// Deliveries awaiting an ack/nack decision.
    pub pending_acks: usize,
    /// Events dropped after exhausting retries.
    pub messages_failed: u64,
    /// Rolling average handler duration.
    pub avg_processing_ms: f64,
    /// Millis since epoch of the last send or delivery.
    pub last_activity: Option<u64>,
}

#[derive(Default)]
struct MetricsInner {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    pending_acks: AtomicUsize,
    messages_failed: AtomicU64,
    processing_sum_ms: AtomicU64,
    processing_count: AtomicU64,
    last_activity: AtomicU64,
}

impl MetricsInner {
    fn snapshot(&self, in_queue: usize) -> QueueMetrics {
        let count = self.processing_count.load(Ordering::Relaxed);
        let avg_processing_ms = if count == 0 {
            0.0
        } else {
            self.processing_sum_ms.load(Ordering::Relaxed) as f64 / count as f64
        };
        let last_activity = match self.last_activity.load(Ordering::Relaxed) {
            0 => None,
            millis => Some(millis),
        };
        QueueMetrics {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            in_queue,
            pending_acks: self.pending_acks.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            avg_processing_ms,
            last_activity,
        }
    }
}

/// Explicit success/failure decision from a consumer handler.
#[derive(Debug, Clone)]
enum AckDecision {
    Ack,
    Nack(Option<String>),
}

/// One delivered event, handed to a `consume` handler.
///
/// `data` is the payload only — the next event waiting on the queue; call
/// [`ReceivedMessage::ack`] or
/// [`ReceivedMessage::nack`] to report the outcome. If the handler returns
/// without calling either and `auto_ack` is set (the default), the queue
/// acks on its behalf.
pub struct ReceivedMessage<D> {
    /// The event payload.
    pub data: D,
    event_id: String,
    delivery_count: u32,
    decision: Arc<Mutex<Option<AckDecision>>>,
}

impl<D> ReceivedMessage<D> {
    /// The id of the underlying event envelope.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// How many times this event has now been delivered, including this
    /// attempt.
    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Report successful processing.
    pub fn ack(&self) {
        let mut guard = self.decision.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(AckDecision::Ack);
    }

    /// Report failed processing, triggering the queue's retry policy.
    pub fn nack(&self, reason: Option<String>) {
        let mut guard = self.decision.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(AckDecision::Nack(reason));
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A consumer handler: receives one message, may call `ack`/`nack` on it.
pub type Handler<D> = Arc<dyn Fn(ReceivedMessage<D>) -> HandlerFuture + Send + Sync>;

struct ConsumerSlot {
    id: String,
    join_handle: JoinHandle<()>,
}

struct QueueShared<D> {
    name: String,
    config: QueueConfig,
    bus: Mutex<Box<dyn MessageBus<D>>>,
    state: Mutex<QueueState>,
    consumer: Mutex<Option<ConsumerSlot>>,
    metrics: MetricsInner,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

/// A named, point-to-point queue. Cheaply cloneable; clones share the same
/// underlying storage and state.
pub struct Queue<D> {
    inner: Arc<QueueShared<D>>,
}

impl<D> Clone for Queue<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<D> std::fmt::Debug for Queue<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("name", &self.inner.name).finish_non_exhaustive()
    }
}

impl<D: Send + 'static> Queue<D> {
    /// Construct a queue in the `Created` state. Use [`Queue::start`] (or
    /// let [`crate::queue_manager::QueueManager::create`] do it) to begin
    /// accepting sends.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Construct a queue with an injected clock, for deterministic retry/ttl
    /// tests.
    #[must_use]
    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let bus: Box<dyn MessageBus<D>> = match config.storage_type {
            StorageType::Fifo => Box::new(FifoBus::new(config.max_size, config.enable_deduplication)),
            StorageType::Priority => Box::new(PriorityBus::new(config.max_size, config.enable_deduplication)),
        };
        Self {
            inner: Arc::new(QueueShared {
                name: config.name.clone(),
                config,
                bus: Mutex::new(bus),
                state: Mutex::new(QueueState::Created),
                consumer: Mutex::new(None),
                metrics: MetricsInner::default(),
                notify: Notify::new(),
                clock,
            }),
        }
    }

    /// The queue's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The queue's configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        *self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Transition `Created -> Running`. A no-op if already running.
    pub fn start(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == QueueState::Created {
            *state = QueueState::Running;
            tracing::info!(queue = %self.inner.name, "queue started");
        }
    }

    fn require_running(&self, operation: &'static str) -> Result<(), HubError> {
        if self.state() == QueueState::Running {
            Ok(())
        } else {
            Err(HubError::InvalidState {
                operation,
                detail: format!("queue '{}' is not running (state: {:?})", self.inner.name, self.state()),
            })
        }
    }

    /// Wrap `data` in an [`Event`] and enqueue it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] if the queue isn't running, or
    /// [`HubError::QueueFull`] if `size() >= max_size`.
    pub fn send(&self, data: D, priority: Option<Priority>) -> Result<(), HubError> {
        self.require_running("send")?;
        let mut event = Event::new("queue.message", self.inner.name.clone(), data);
        if let Some(priority) = priority {
            event.priority = priority;
        }
        let mut bus = self.inner.bus.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match bus.enqueue(event) {
            Ok(()) => {
                drop(bus);
                self.inner.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.last_activity.store(self.inner.clock.now_millis(), Ordering::Relaxed);
                metrics::counter!("eventhub_queue_messages_sent_total", "queue" => self.inner.name.clone())
                    .increment(1);
                self.inner.notify.notify_one();
                Ok(())
            }
            Err(HubError::QueueFull { max_size, .. }) => Err(HubError::QueueFull {
                queue: self.inner.name.clone(),
                max_size,
            }),
            Err(other) => Err(other),
        }
    }

    /// Dequeue the next ready event's payload, if any, waiting with a
    /// bounded backoff (capped by `receive_idle_ms`) until one is available
    /// or the queue stops.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidState`] if the queue isn't running.
    pub async fn receive(&self) -> Result<Option<D>, HubError> {
        self.require_running("receive")?;
        loop {
            if let Some(event) = self.try_dequeue_ready() {
                self.inner.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.last_activity.store(self.inner.clock.now_millis(), Ordering::Relaxed);
                return Ok(Some(event.data));
            }
            if self.state() != QueueState::Running {
                return Ok(None);
            }
            let wait = self.inner.notify.notified();
            tokio::select! {
                () = wait => {},
                () = tokio::time::sleep(Duration::from_millis(50)) => {},
            }
            if self.state() != QueueState::Running {
                return Ok(None);
            }
        }
    }

    /// Pop the next event if it's ready (its `_retryAt`, if any, has
    /// passed); otherwise leave the bus untouched.
    fn try_dequeue_ready(&self) -> Option<Event<D>> {
        let mut bus = self.inner.bus.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = self.inner.clock.now_millis();
        match bus.peek() {
            Some(event) if is_ready(event, now) => bus.dequeue(),
            _ => None,
        }
    }

    /// Register a single consumer and start its cooperative delivery loop.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyExists`] if a consumer is already
    /// registered, or [`HubError::InvalidState`] if the queue isn't
    /// running.
    pub fn consume(&self, handler: Handler<D>, opts: ConsumeOptions) -> Result<String, HubError>
    where
        D: Clone,
    {
        self.require_running("consume")?;
        let mut consumer = self.inner.consumer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if consumer.is_some() {
            return Err(HubError::AlreadyExists {
                kind: "consumer",
                name: self.inner.name.clone(),
            });
        }
        let consumer_id = format!("consumer-{}", eventhub_core::generate_event_id());
        let queue = self.clone();
        let id_for_task = consumer_id.clone();
        let join_handle = tokio::spawn(async move {
            queue.consumer_loop(id_for_task, handler, opts).await;
        });
        *consumer = Some(ConsumerSlot {
            id: consumer_id.clone(),
            join_handle,
        });
        tracing::info!(queue = %self.inner.name, consumer = %consumer_id, "consumer registered");
        Ok(consumer_id)
    }

    async fn consumer_loop(&self, consumer_id: String, handler: Handler<D>, opts: ConsumeOptions)
    where
        D: Clone,
    {
        loop {
            let state = self.state();
            if state == QueueState::Stopped {
                break;
            }
            let Some(event) = self.try_dequeue_ready() else {
                if state != QueueState::Running {
                    break;
                }
                let wait = self.inner.notify.notified();
                let cap = Duration::from_millis(opts.receive_idle_ms.max(1));
                tokio::select! {
                    () = wait => {},
                    () = tokio::time::sleep(cap) => {},
                }
                continue;
            };
            if state != QueueState::Running {
                // Draining: let the dequeued event be processed (it was
                // already taken off the bus) but don't pull another after.
                self.deliver(event, &handler, &opts).await;
                break;
            }
            self.deliver(event, &handler, &opts).await;
        }
        tracing::info!(queue = %self.inner.name, consumer = %consumer_id, "consumer loop exited");
    }

    async fn deliver(&self, event: Event<D>, handler: &Handler<D>, opts: &ConsumeOptions)
    where
        D: Clone,
    {
        self.inner.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.pending_acks.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.last_activity.store(self.inner.clock.now_millis(), Ordering::Relaxed);

        let event = event.with_delivery_attempt_recorded();
        let decision = Arc::new(Mutex::new(None));
        let message = ReceivedMessage {
            data: event.data.clone(),
            event_id: event.id.clone(),
            delivery_count: event.delivery_count(),
            decision: decision.clone(),
        };

        let started = self.inner.clock.now_millis();
        let fut = (handler)(message);
        let outcome = tokio::spawn(fut).await;
        let elapsed = self.inner.clock.now_millis().saturating_sub(started);
        self.inner.metrics.processing_sum_ms.fetch_add(elapsed, Ordering::Relaxed);
        self.inner.metrics.processing_count.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.pending_acks.fetch_sub(1, Ordering::Relaxed);

        let panicked = outcome.is_err();
        let decided = decision.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();

        let effective = match (panicked, decided, opts.auto_ack) {
            (true, _, _) => AckDecision::Nack(Some("handler panicked".to_string())),
            (false, Some(d), _) => d,
            (false, None, true) => AckDecision::Ack,
            (false, None, false) => return,
        };

        metrics::histogram!("eventhub_queue_processing_duration_ms", "queue" => self.inner.name.clone())
            .record(elapsed as f64);

        match effective {
            AckDecision::Ack => {
                tracing::trace!(queue = %self.inner.name, event = %event.id, "event acked");
                metrics::counter!("eventhub_queue_messages_acked_total", "queue" => self.inner.name.clone())
                    .increment(1);
            }
            AckDecision::Nack(reason) => {
                self.handle_nack(event, reason.as_deref().unwrap_or("nacked"), opts);
            }
        }
    }

    fn handle_nack(&self, event: Event<D>, reason: &str, opts: &ConsumeOptions) {
        let delivery_count = event.delivery_count();
        if delivery_count <= opts.max_retries {
            let now = self.inner.clock.now_millis();
            let retried = event.into_retry(now, opts.retry_delay_ms, reason);
            let mut bus = self.inner.bus.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            // Retry re-enqueue only fails on capacity; a full queue simply
            // drops the retry rather than blocking the consumer loop.
            if bus.enqueue(retried).is_err() {
                drop(bus);
                self.inner.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(queue = %self.inner.name, "retry dropped: queue full");
            } else {
                drop(bus);
                self.inner.notify.notify_one();
                tracing::debug!(queue = %self.inner.name, delivery_count, "event scheduled for retry");
            }
        } else {
            let mut event = event;
            event.mark_final_failure();
            self.inner.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("eventhub_queue_messages_failed_total", "queue" => self.inner.name.clone())
                .increment(1);
            tracing::warn!(queue = %self.inner.name, event = %event.id, "retries exhausted, dropping event");
        }
    }

    /// Stop the registered consumer, if any, waiting for its loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if `consumer_id` doesn't match the
    /// currently registered consumer.
    pub async fn stop_consuming(&self, consumer_id: &str) -> Result<(), HubError> {
        let slot = {
            let mut consumer = self.inner.consumer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            match consumer.as_ref() {
                Some(c) if c.id == consumer_id => consumer.take(),
                Some(_) | None => {
                    return Err(HubError::NotFound {
                        kind: "consumer",
                        name: consumer_id.to_string(),
                    })
                }
            }
        };
        if let Some(slot) = slot {
            self.inner.notify.notify_waiters();
            let _ = slot.join_handle.await;
        }
        Ok(())
    }

    /// Clear all pending messages.
    pub fn clear(&self) {
        self.inner.bus.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        let in_queue = self.inner.bus.lock().unwrap_or_else(std::sync::PoisonError::into_inner).size();
        metrics::gauge!("eventhub_queue_depth", "queue" => self.inner.name.clone()).set(in_queue as f64);
        self.inner.metrics.snapshot(in_queue)
    }

    /// Transition to `Draining`, then `Stopped` once the consumer loop (if
    /// any) exits or `deadline` elapses. Returns `true` if the consumer did
    /// not exit before `deadline`.
    pub async fn stop(&self, deadline: Duration) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state == QueueState::Stopped {
                return false;
            }
            *state = QueueState::Draining;
        }
        self.inner.notify.notify_waiters();

        let mut timed_out = false;
        let slot = self.inner.consumer.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(slot) = slot {
            if tokio::time::timeout(deadline, slot.join_handle).await.is_err() {
                tracing::warn!(queue = %self.inner.name, "consumer did not exit before shutdown deadline");
                timed_out = true;
            }
        }
        *self.inner.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = QueueState::Stopped;
        tracing::info!(queue = %self.inner.name, "queue stopped");
        timed_out
    }
}
