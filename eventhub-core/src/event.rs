//! Event envelope — the immutable record produced when a payload is published.
//!
//! Every [`Queue::send`](crate) and [`Topic::publish`](crate) call wraps its
//! payload in an [`Event`] before it touches any storage. The envelope never
//! changes shape after it is built; retries and metadata annotations clone a
//! new envelope with updated `metadata` rather than mutating the original in
//! place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery priority. Ordered so that `High < Normal < Low`: a priority
/// [`crate::MessageBus`] dequeues `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Dequeued before `Normal` and `Low`.
    High,
    /// Default priority.
    Normal,
    /// Dequeued after `High` and `Normal`.
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        };
        write!(f, "{s}")
    }
}

/// Metadata keys the hub reserves for its own bookkeeping. User-supplied
/// metadata must not use the leading-underscore prefix; the core does not
/// enforce this (metadata is a free-form bag) but will overwrite these keys.
pub mod reserved_keys {
    /// Number of times an event has been delivered for a given send.
    pub const DELIVERY_COUNT: &str = "_deliveryCount";
    /// Reason captured from the most recent nack/failure.
    pub const LAST_ERROR: &str = "_lastError";
    /// Earliest instant (millis since epoch) at which a retried event may be
    /// redelivered.
    pub const RETRY_AT: &str = "_retryAt";
    /// Set once retries are exhausted for an event.
    pub const FINAL_FAILURE: &str = "_finalFailure";
}

static ID_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Generate an event id of the form `evt-<millis>-<9-char random>`.
///
/// The millisecond component keeps ids roughly sortable; the random suffix
/// (drawn from an alphanumeric alphabet) disambiguates ids minted within the
/// same millisecond, which is also the final tie-breaker for priority
/// ordering (see [`crate::bus`](crate)).
#[must_use]
pub fn generate_event_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("evt-{millis}-{}", random_suffix(seq))
}

/// Draw a 9-character alphanumeric suffix. `salt` is mixed in so that ids
/// minted in rapid succession on the same thread still diverge even if the
/// RNG seed is identical.
fn random_suffix(salt: u32) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..9)
        .map(|i| {
            let idx = if i == 0 {
                (salt as usize).wrapping_add(rng.gen_range(0..ALPHABET.len())) % ALPHABET.len()
            } else {
                rng.gen_range(0..ALPHABET.len())
            };
            ALPHABET[idx] as char
        })
        .collect()
}

/// The immutable envelope wrapped around every published or enqueued
/// payload.
///
/// `D` is the opaque payload type. The core places no constraints on it
/// beyond what delivery requires: `Clone` because topic fan-out delivers the
/// same event to many subscribers, `Send + Sync + 'static` because delivery
/// crosses task boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<D> {
    /// Unique identifier, `evt-<millis>-<random>` by default.
    pub id: String,
    /// Logical event name. No reserved characters.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Producer tag; defaults to the owning hub's name.
    pub source: String,
    /// Delivery priority.
    pub priority: Priority,
    /// Opaque payload.
    pub data: D,
    /// Optional tracing token.
    pub correlation_id: Option<String>,
    /// Free-form key/value bag. Keys prefixed `_` are hub-reserved.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl<D> Event<D> {
    /// Build an envelope with a freshly generated id and the current time.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: D) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.into(),
            timestamp: now_millis(),
            source: source.into(),
            priority: Priority::default(),
            data,
            correlation_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Override the priority (builder style).
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a correlation id (builder style).
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Merge metadata entries (builder style).
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Current `_deliveryCount`, defaulting to `0` when absent.
    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.metadata
            .get(reserved_keys::DELIVERY_COUNT)
            .and_then(serde_json::Value::as_u64)
            .map_or(0, |v| v as u32)
    }

    /// Clone this event with `_deliveryCount` incremented by one. Called
    /// once per actual delivery attempt, before the handler runs, so
    /// `_deliveryCount` always reflects attempts made rather than retries
    /// decided.
    #[must_use]
    pub fn with_delivery_attempt_recorded(mut self) -> Self {
        let next_count = self.delivery_count() + 1;
        self.metadata.insert(
            reserved_keys::DELIVERY_COUNT.to_string(),
            serde_json::Value::from(next_count),
        );
        self
    }

    /// Clone this event with a recorded `_lastError` and a `_retryAt`
    /// computed from `retry_delay_ms` against `now_millis`. Does not touch
    /// `_deliveryCount`; callers stamp that separately via
    /// [`Event::with_delivery_attempt_recorded`] at delivery time.
    #[must_use]
    pub fn into_retry(mut self, now_millis: u64, retry_delay_ms: u64, last_error: &str) -> Self {
        self.metadata.insert(
            reserved_keys::LAST_ERROR.to_string(),
            serde_json::Value::from(last_error),
        );
        self.metadata.insert(
            reserved_keys::RETRY_AT.to_string(),
            serde_json::Value::from(now_millis + retry_delay_ms),
        );
        self
    }

    /// `_retryAt`, if set.
    #[must_use]
    pub fn retry_at(&self) -> Option<u64> {
        self.metadata
            .get(reserved_keys::RETRY_AT)
            .and_then(serde_json::Value::as_u64)
    }

    /// Mark this event as having exhausted its retry budget.
    pub fn mark_final_failure(&mut self) {
        self.metadata.insert(
            reserved_keys::FINAL_FAILURE.to_string(),
            serde_json::Value::Bool(true),
        );
    }
}

/// Milliseconds since the Unix epoch, clamped to `0` if the clock is somehow
/// before the epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
