//! # Event Hub — Core
//!
//! Data model, error taxonomy, and the broker-port trait shared by every
//! other crate in this workspace. This crate has no opinion on scheduling —
//! it defines what an [`Event`](event::Event) is, what can go wrong
//! ([`HubError`](error::HubError)), how entities are configured
//! ([`config`]), and the ABI a broker adapter must satisfy
//! ([`broker_port`]). `eventhub-runtime` is where queues, topics, and the
//! hub façade actually run.

pub mod broker_port;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;

pub use broker_port::{BoxFuture, BrokerPort, BrokerPortBase, InboundHandler, PortEvent, PortMetrics};
pub use clock::{system_clock, Clock, SystemClock};
pub use config::{HubConfig, PortConfig, QueueConfig, StorageType, TopicConfig};
pub use error::{ErrorCode, ErrorContext, ErrorEnvelope, HubError, Recovery};
pub use event::{generate_event_id, now_millis, reserved_keys, Event, Priority};
