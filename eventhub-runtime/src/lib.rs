//! # Event Hub — Runtime
//!
//! Queue engine, topic engine, broker-port aggregation, and the
//! [`EventHub`] façade that ties them together behind one lifecycle state
//! machine. `eventhub-core` defines the data model and the contracts;
//! this crate is where they actually run.
//!
//! ## Core components
//!
//! - [`bus`] — pure message storage (`FifoBus`, `PriorityBus`)
//! - [`queue`] — point-to-point delivery, retries, one consumer at a time
//! - [`topic`] — fan-out pub-sub with filters and once-subscriptions
//! - [`event_bus`] — type-keyed pub-sub behind `EventHub::emit`/`publish`/`on`/`off`
//! - [`port_registry`] — aggregate publish/subscribe over broker ports
//! - [`internal_events`] — hub-lifecycle notifications (`on_internal`/`off_internal`)
//! - [`hub`] — [`EventHub`], the entry point
//!
//! ## Example
//!
//! ```no_run
//! use eventhub_core::{HubConfig, QueueConfig};
//! use eventhub_runtime::EventHub;
//!
//! # async fn example() -> Result<(), eventhub_core::HubError> {
//! let hub: EventHub<serde_json::Value> = EventHub::new(HubConfig::new("orders-hub")?);
//! hub.initialize()?;
//! hub.start()?;
//!
//! let queue = hub.create_queue(QueueConfig::new("orders")?)?;
//! queue.send(serde_json::json!({"orderId": "o-1"}), None)?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod event_bus;
pub mod hub;
pub mod internal_events;
pub mod port_registry;
pub mod queue;
pub mod queue_manager;
pub mod topic;
pub mod topic_manager;

pub use bus::{FifoBus, MessageBus, PriorityBus};
pub use event_bus::{EventBus, Handler as BusHandler, OnOptions, Subscription};
pub use hub::{EventHub, HubMetrics, HubState, PublishOptions};
pub use internal_events::{HubEvent, InternalEventBus, Listener};
pub use port_registry::PortRegistry;
pub use queue::{ConsumeOptions, Handler as QueueHandler, Queue, QueueMetrics, QueueState, ReceivedMessage};
pub use queue_manager::QueueManager;
pub use topic::{Filter as TopicFilter, Handler as TopicHandler, SubscribeOptions, Topic, TopicMetrics};
pub use topic_manager::TopicManager;
