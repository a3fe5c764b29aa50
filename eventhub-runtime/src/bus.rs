//! Pure message storage: enqueue/dequeue/peek/size/clear.
//!
//! A [`MessageBus`] carries no consumer, metrics, or ack state — that is
//! [`crate::queue::Queue`]'s job. Two implementations share the contract:
//! [`FifoBus`] (insertion-order) and [`PriorityBus`] (a binary heap keyed on
//! `(ready_at, priority, timestamp, id)`, so that a retried event's
//! `_retryAt` is honored without losing priority ordering once it becomes
//! eligible.

use eventhub_core::event::Event;
use eventhub_core::error::HubError;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet, VecDeque};

/// Shared contract for both bus implementations.
pub trait MessageBus<D>: Send {
    /// Enqueue an event.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::QueueFull`] when `size() >= max_size`, or
    /// [`HubError::ValidationFailed`] when deduplication is enabled and
    /// `event.id` was already seen within the dedup window.
    fn enqueue(&mut self, event: Event<D>) -> Result<(), HubError>;

    /// Pop the next event in bus-defined order.
    fn dequeue(&mut self) -> Option<Event<D>>;

    /// Peek the next event without removing it.
    fn peek(&self) -> Option<&Event<D>>;

    /// Current depth.
    fn size(&self) -> usize;

    /// Whether the bus is empty.
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove every event.
    fn clear(&mut self);

    /// Maximum depth before `enqueue` returns `QueueFull`.
    fn max_size(&self) -> usize;
}

/// Bounded-window id deduplication, shared by both bus implementations.
///
/// Tracks the last `window` ids seen (insertion order) rather than a true
/// bloom filter — exact and simple, at the cost of `O(window)` memory,
/// which is appropriate for the per-queue windows this crate uses.
struct DedupWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    window: usize,
}

impl DedupWindow {
    fn new(window: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            window,
        }
    }

    /// Returns `true` if `id` was already seen (a collision); otherwise
    /// records it and returns `false`.
    fn check_and_insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return true;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        false
    }

    fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

const DEFAULT_DEDUP_WINDOW: usize = 1_000;

/// Insertion-order ring buffer.
pub struct FifoBus<D> {
    items: VecDeque<Event<D>>,
    max_size: usize,
    dedup: Option<DedupWindow>,
}

impl<D> FifoBus<D> {
    /// Create a FIFO bus with the given capacity and optional id
    /// deduplication.
    #[must_use]
    pub fn new(max_size: usize, enable_deduplication: bool) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            dedup: enable_deduplication.then(|| DedupWindow::new(DEFAULT_DEDUP_WINDOW)),
        }
    }
}

impl<D: Send> MessageBus<D> for FifoBus<D> {
    fn enqueue(&mut self, event: Event<D>) -> Result<(), HubError> {
        if self.items.len() >= self.max_size {
            return Err(HubError::QueueFull {
                queue: String::new(),
                max_size: self.max_size,
            });
        }
        if let Some(dedup) = &mut self.dedup {
            if dedup.check_and_insert(&event.id) {
                return Err(HubError::ValidationFailed {
                    operation: "enqueue",
                    detail: format!("duplicate event id '{}'", event.id),
                });
            }
        }
        self.items.push_back(event);
        Ok(())
    }

    fn dequeue(&mut self) -> Option<Event<D>> {
        self.items.pop_front()
    }

    fn peek(&self) -> Option<&Event<D>> {
        self.items.front()
    }

    fn size(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear();
        if let Some(dedup) = &mut self.dedup {
            dedup.clear();
        }
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Heap entry ordered by `(ready_at, priority, timestamp, id)`. `ready_at`
/// is `event.retry_at()` when present, otherwise `event.timestamp` — this
/// is what lets a retried event sort behind its `_retryAt` while an event
/// with no retry still orders purely by priority/timestamp/id.
struct HeapEntry<D> {
    ready_at: u64,
    priority: eventhub_core::event::Priority,
    timestamp: u64,
    id: String,
    event: Event<D>,
}

impl<D> HeapEntry<D> {
    fn new(event: Event<D>) -> Self {
        let ready_at = event.retry_at().unwrap_or(event.timestamp);
        Self {
            ready_at,
            priority: event.priority,
            timestamp: event.timestamp,
            id: event.id.clone(),
            event,
        }
    }

    fn key(&self) -> (u64, eventhub_core::event::Priority, u64, &str) {
        (self.ready_at, self.priority, self.timestamp, self.id.as_str())
    }
}

impl<D> PartialEq for HeapEntry<D> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl<D> Eq for HeapEntry<D> {}

impl<D> PartialOrd for HeapEntry<D> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<D> Ord for HeapEntry<D> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; we want the *smallest* key popped first
        // (earliest ready_at, then HIGH < NORMAL < LOW, then earliest
        // timestamp, then lexicographically smallest id), so reverse it.
        other.key().cmp(&self.key())
    }
}

/// Binary heap keyed by `(ready_at, priority, timestamp, id)`.
pub struct PriorityBus<D> {
    heap: BinaryHeap<HeapEntry<D>>,
    max_size: usize,
    dedup: Option<DedupWindow>,
}

impl<D> PriorityBus<D> {
    /// Create a priority bus with the given capacity and optional id
    /// deduplication.
    #[must_use]
    pub fn new(max_size: usize, enable_deduplication: bool) -> Self {
        Self {
            heap: BinaryHeap::new(),
            max_size,
            dedup: enable_deduplication.then(|| DedupWindow::new(DEFAULT_DEDUP_WINDOW)),
        }
    }
}

impl<D: Send> MessageBus<D> for PriorityBus<D> {
    fn enqueue(&mut self, event: Event<D>) -> Result<(), HubError> {
        if self.heap.len() >= self.max_size {
            return Err(HubError::QueueFull {
                queue: String::new(),
                max_size: self.max_size,
            });
        }
        if let Some(dedup) = &mut self.dedup {
            if dedup.check_and_insert(&event.id) {
                return Err(HubError::ValidationFailed {
                    operation: "enqueue",
                    detail: format!("duplicate event id '{}'", event.id),
                });
            }
        }
        self.heap.push(HeapEntry::new(event));
        Ok(())
    }

    fn dequeue(&mut self) -> Option<Event<D>> {
        self.heap.pop().map(|entry| entry.event)
    }

    fn peek(&self) -> Option<&Event<D>> {
        self.heap.peek().map(|entry| &entry.event)
    }

    fn size(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
        if let Some(dedup) = &mut self.dedup {
            dedup.clear();
        }
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Events not yet eligible for redelivery still occupy a slot in `size()`
/// but [`Queue`](crate::queue::Queue) only dequeues entries whose
/// `ready_at` has passed; peeking a not-yet-ready entry is the consumer
/// loop's signal to keep waiting rather than delivering early.
pub fn is_ready(event: &Event<impl Send>, now_millis: u64) -> bool {
    event.retry_at().is_none_or(|retry_at| retry_at <= now_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhub_core::event::Priority;

    fn event(id: &str, priority: Priority, timestamp: u64) -> Event<u32> {
        Event {
            id: id.to_string(),
            event_type: "t".to_string(),
            timestamp,
            source: "s".to_string(),
            priority,
            data: 0,
            correlation_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn fifo_preserves_insertion_order() {
        let mut bus = FifoBus::new(10, false);
        bus.enqueue(event("a", Priority::Normal, 1)).unwrap();
        bus.enqueue(event("b", Priority::Normal, 2)).unwrap();
        assert_eq!(bus.dequeue().unwrap().id, "a");
        assert_eq!(bus.dequeue().unwrap().id, "b");
        assert!(bus.dequeue().is_none());
    }

    #[test]
    fn fifo_rejects_past_max_size() {
        let mut bus = FifoBus::new(1, false);
        bus.enqueue(event("a", Priority::Normal, 1)).unwrap();
        let err = bus.enqueue(event("b", Priority::Normal, 2)).unwrap_err();
        assert!(matches!(err, HubError::QueueFull { .. }));
        assert_eq!(bus.size(), 1);
    }

    #[test]
    fn fifo_dedup_rejects_duplicate_ids() {
        let mut bus = FifoBus::new(10, true);
        bus.enqueue(event("a", Priority::Normal, 1)).unwrap();
        let err = bus.enqueue(event("a", Priority::Normal, 2)).unwrap_err();
        assert!(matches!(err, HubError::ValidationFailed { .. }));
        assert_eq!(bus.size(), 1);
    }

    #[test]
    fn priority_orders_high_before_normal_before_low() {
        let mut bus = PriorityBus::new(10, false);
        bus.enqueue(event("p1", Priority::Normal, 1)).unwrap();
        bus.enqueue(event("p2", Priority::High, 2)).unwrap();
        bus.enqueue(event("p3", Priority::Normal, 3)).unwrap();

        assert_eq!(bus.dequeue().unwrap().id, "p2");
        assert_eq!(bus.dequeue().unwrap().id, "p1");
        assert_eq!(bus.dequeue().unwrap().id, "p3");
    }

    #[test]
    fn priority_ties_break_on_timestamp_then_id() {
        let mut bus = PriorityBus::new(10, false);
        bus.enqueue(event("b", Priority::Normal, 5)).unwrap();
        bus.enqueue(event("a", Priority::Normal, 5)).unwrap();
        bus.enqueue(event("c", Priority::Normal, 1)).unwrap();

        assert_eq!(bus.dequeue().unwrap().id, "c");
        assert_eq!(bus.dequeue().unwrap().id, "a");
        assert_eq!(bus.dequeue().unwrap().id, "b");
    }

    #[test]
    fn priority_respects_retry_at_over_raw_priority() {
        let mut bus = PriorityBus::new(10, false);
        let mut high_but_delayed = event("delayed", Priority::High, 100);
        high_but_delayed = high_but_delayed.into_retry(100, 1_000, "nack");
        bus.enqueue(high_but_delayed).unwrap();
        bus.enqueue(event("normal-now", Priority::Normal, 200)).unwrap();

        // The delayed HIGH event has ready_at = 1100, later than the NORMAL
        // event's ready_at = 200, so it dequeues second despite higher
        // priority.
        assert_eq!(bus.dequeue().unwrap().id, "normal-now");
        assert_eq!(bus.dequeue().unwrap().id, "delayed");
    }

    #[test]
    fn clear_empties_bus_and_dedup_state() {
        let mut bus = FifoBus::new(10, true);
        bus.enqueue(event("a", Priority::Normal, 1)).unwrap();
        bus.clear();
        assert_eq!(bus.size(), 0);
        bus.enqueue(event("a", Priority::Normal, 2)).unwrap();
        assert_eq!(bus.size(), 1);
    }
}
