//! Registry of named queues belonging to one [`crate::hub::EventHub`].

use crate::queue::Queue;
use eventhub_core::config::QueueConfig;
use eventhub_core::clock::Clock;
use eventhub_core::error::HubError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Owns every queue created under a hub. Queue creation is eager: a queue
/// transitions straight to `Running` once registered.
pub struct QueueManager<D> {
    queues: RwLock<HashMap<String, Queue<D>>>,
    clock: Arc<dyn Clock>,
}

impl<D: Send + 'static> QueueManager<D> {
    /// Construct an empty registry backed by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Create and start a new queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyExists`] if a queue with `config.name`
    /// already exists.
    pub fn create(&self, config: QueueConfig) -> Result<Queue<D>, HubError> {
        let mut queues = self.queues.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if queues.contains_key(&config.name) {
            return Err(HubError::AlreadyExists {
                kind: "queue",
                name: config.name,
            });
        }
        let queue = Queue::with_clock(config.clone(), self.clock.clone());
        queue.start();
        queues.insert(config.name, queue.clone());
        Ok(queue)
    }

    /// Look up an existing queue by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no queue with that name exists.
    pub fn get(&self, name: &str) -> Result<Queue<D>, HubError> {
        self.queues
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::NotFound {
                kind: "queue",
                name: name.to_string(),
            })
    }

    /// Names of every registered queue.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Remove a queue from the registry and stop it, waiting up to
    /// `deadline` for its consumer (if any) to exit.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no queue with that name exists.
    pub async fn delete(&self, name: &str, deadline: std::time::Duration) -> Result<(), HubError> {
        let queue = {
            let mut queues = self.queues.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            queues.remove(name).ok_or_else(|| HubError::NotFound {
                kind: "queue",
                name: name.to_string(),
            })?
        };
        queue.stop(deadline).await;
        Ok(())
    }

    /// Stop every queue, waiting up to `deadline` (applied per queue) for
    /// in-flight consumers to exit. Returns the names of any queues whose
    /// consumer did not exit before the deadline.
    pub async fn stop_all(&self, deadline: std::time::Duration) -> Vec<String> {
        let queues: Vec<Queue<D>> = self
            .queues
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain()
            .map(|(_, q)| q)
            .collect();
        let mut timed_out = Vec::new();
        for queue in queues {
            if queue.stop(deadline).await {
                timed_out.push(queue.name().to_string());
            }
        }
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhub_core::clock::system_clock;

    fn manager() -> QueueManager<u32> {
        QueueManager::new(system_clock())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let mgr = manager();
        mgr.create(QueueConfig::new("orders").unwrap()).unwrap();
        let queue = mgr.get("orders").unwrap();
        assert_eq!(queue.name(), "orders");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let mgr = manager();
        mgr.create(QueueConfig::new("orders").unwrap()).unwrap();
        let err = mgr.create(QueueConfig::new("orders").unwrap()).unwrap_err();
        assert!(matches!(err, HubError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn get_unknown_queue_is_not_found() {
        let mgr = manager();
        let err = mgr.get("missing").unwrap_err();
        assert!(matches!(err, HubError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let mgr = manager();
        mgr.create(QueueConfig::new("b").unwrap()).unwrap();
        mgr.create(QueueConfig::new("a").unwrap()).unwrap();
        assert_eq!(mgr.list(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn delete_stops_and_removes_the_queue() {
        let mgr = manager();
        let queue = mgr.create(QueueConfig::new("orders").unwrap()).unwrap();
        mgr.delete("orders", std::time::Duration::from_secs(1)).await.unwrap();
        assert_eq!(queue.state(), crate::queue::QueueState::Stopped);
        assert!(mgr.get("orders").is_err());
    }

    #[tokio::test]
    async fn stop_all_reports_queues_whose_consumer_does_not_exit_in_time() {
        let mgr = manager();
        let queue = mgr.create(QueueConfig::new("orders").unwrap()).unwrap();
        queue.send(1, None).unwrap();

        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        queue
            .consume(
                Arc::new(move |_msg: crate::queue::ReceivedMessage<u32>| {
                    let started_tx = started_tx.clone();
                    Box::pin(async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    })
                }),
                crate::queue::ConsumeOptions::default(),
            )
            .unwrap();
        started_rx.recv().await;

        let timed_out = mgr.stop_all(std::time::Duration::from_millis(10)).await;
        assert_eq!(timed_out, vec!["orders".to_string()]);
    }
}
