//! Configuration records, constructed in-process and validated eagerly.
//!
//! Nothing in this crate reads an environment variable or a config file; a
//! host application is free to layer that on top by deserializing these
//! records with `serde` from whatever source it prefers.

use crate::error::HubError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Storage discipline for a [`crate::MessageBus`](crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Insertion-order delivery.
    Fifo,
    /// `(ready_at, priority, timestamp, id)`-ordered delivery.
    Priority,
}

impl Default for StorageType {
    fn default() -> Self {
        Self::Fifo
    }
}

/// Hub-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub name. Must match `^[A-Za-z0-9_-]{1,100}$`.
    pub name: String,
    /// Whether to record metrics via the `metrics` facade.
    pub enable_metrics: bool,
    /// Default per-event processing timeout.
    pub event_timeout_ms: u64,
    /// Deadline for graceful shutdown before the hub is forced to `Failed`.
    pub shutdown_deadline_ms: u64,
}

impl HubConfig {
    /// Construct and validate a new hub configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `name` does not match
    /// `^[A-Za-z0-9_-]{1,100}$`.
    pub fn new(name: impl Into<String>) -> Result<Self, HubError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(HubError::InvalidConfig {
                operation: "HubConfig::new",
                detail: format!("name '{name}' must match ^[A-Za-z0-9_-]{{1,100}}$"),
            });
        }
        Ok(Self {
            name,
            enable_metrics: true,
            event_timeout_ms: 30_000,
            shutdown_deadline_ms: 30_000,
        })
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, unique within a hub.
    pub name: String,
    /// Capacity; enqueue past this returns `QueueFull`.
    pub max_size: usize,
    /// Advisory flag; this crate does not itself persist queue contents.
    pub persistent: bool,
    /// Backing storage discipline.
    pub storage_type: StorageType,
    /// Whether to reject duplicate event ids within the bus's dedup window.
    pub enable_deduplication: bool,
    /// Free-form metadata echoed back by introspection APIs.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl QueueConfig {
    /// Construct and validate a new queue configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `name` is empty or `max_size`
    /// is zero.
    pub fn new(name: impl Into<String>) -> Result<Self, HubError> {
        let name = name.into();
        if name.is_empty() {
            return Err(HubError::InvalidConfig {
                operation: "QueueConfig::new",
                detail: "name must be non-empty".to_string(),
            });
        }
        Ok(Self {
            name,
            max_size: 10_000,
            persistent: false,
            storage_type: StorageType::default(),
            enable_deduplication: true,
            metadata: BTreeMap::new(),
        })
    }

    /// Override `max_size` (builder style), validating it is positive.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `max_size` is zero.
    pub fn with_max_size(mut self, max_size: usize) -> Result<Self, HubError> {
        if max_size == 0 {
            return Err(HubError::InvalidConfig {
                operation: "QueueConfig::with_max_size",
                detail: "max_size must be > 0".to_string(),
            });
        }
        self.max_size = max_size;
        Ok(self)
    }

    /// Override `storage_type` (builder style).
    #[must_use]
    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }
}

/// Topic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic name, unique within a hub.
    pub name: String,
    /// Advisory flag; this crate does not itself persist topic history.
    pub persistent: bool,
    /// Events older than this (by envelope timestamp) are dropped on
    /// delivery attempt rather than handed to a subscriber.
    pub ttl_ms: Option<u64>,
}

impl TopicConfig {
    /// Construct and validate a new topic configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, HubError> {
        let name = name.into();
        if name.is_empty() {
            return Err(HubError::InvalidConfig {
                operation: "TopicConfig::new",
                detail: "name must be non-empty".to_string(),
            });
        }
        Ok(Self {
            name,
            persistent: false,
            ttl_ms: None,
        })
    }

    /// Override `ttl_ms` (builder style), validating it is positive.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `ttl_ms` is zero.
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Result<Self, HubError> {
        if ttl_ms == 0 {
            return Err(HubError::InvalidConfig {
                operation: "TopicConfig::with_ttl_ms",
                detail: "ttl_ms must be > 0".to_string(),
            });
        }
        self.ttl_ms = Some(ttl_ms);
        Ok(self)
    }
}

/// Serialization format a broker port's wire adapter uses. The core treats
/// this as opaque configuration; only the adapter interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    /// JSON encoding.
    Json,
    /// Avro encoding.
    Avro,
    /// Protobuf encoding.
    Protobuf,
    /// Adapter-defined encoding.
    Custom,
}

/// Retry policy for a broker port's own reconnect logic. The hub does not
/// retry on the adapter's behalf; this is purely descriptive configuration
/// an adapter may consult.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRetryConfig {
    /// Maximum reconnect attempts.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay_ms: u64,
}

/// Broker port configuration. `connection` is deliberately untyped
/// (`serde_json::Value`) since the shape of a connection descriptor is
/// adapter-specific; concrete adapters (e.g. `eventhub-redpanda`) document
/// the fields they read from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Adapter-specific connection descriptor.
    pub connection: serde_json::Value,
    /// Inbound topics/subjects to subscribe to, if applicable.
    pub subscriptions: Vec<String>,
    /// Wire serialization format.
    pub serialization: Option<Serialization>,
    /// Whether to compress outbound payloads.
    pub compression: bool,
    /// Connection attempt timeout.
    pub connection_timeout_ms: Option<u64>,
    /// Adapter reconnect policy.
    pub retry: Option<PortRetryConfig>,
}

impl PortConfig {
    /// Construct a port configuration from a connection descriptor, using
    /// the stated defaults for everything else.
    #[must_use]
    pub fn new(connection: serde_json::Value) -> Self {
        Self {
            connection,
            subscriptions: Vec::new(),
            serialization: None,
            compression: false,
            connection_timeout_ms: None,
            retry: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_config_rejects_invalid_names() {
        assert!(HubConfig::new("valid-name_1").is_ok());
        assert!(HubConfig::new("").is_err());
        assert!(HubConfig::new("has a space").is_err());
        assert!(HubConfig::new("x".repeat(101)).is_err());
    }

    #[test]
    fn queue_config_rejects_zero_max_size() {
        let cfg = QueueConfig::new("orders").unwrap();
        assert!(cfg.with_max_size(0).is_err());
    }

    #[test]
    fn topic_config_rejects_zero_ttl() {
        let cfg = TopicConfig::new("user-activity").unwrap();
        assert!(cfg.with_ttl_ms(0).is_err());
        let cfg = TopicConfig::new("user-activity").unwrap();
        assert!(cfg.with_ttl_ms(1_000).is_ok());
    }
}
