//! Registry of named topics belonging to one [`crate::hub::EventHub`].

use crate::topic::Topic;
use eventhub_core::clock::Clock;
use eventhub_core::config::TopicConfig;
use eventhub_core::error::HubError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Owns every topic created under a hub.
pub struct TopicManager<D> {
    topics: RwLock<HashMap<String, Topic<D>>>,
    clock: Arc<dyn Clock>,
}

impl<D: Clone + Send + Sync + 'static> TopicManager<D> {
    /// Construct an empty registry backed by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Create a new topic.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyExists`] if a topic with `config.name`
    /// already exists.
    pub fn create(&self, config: TopicConfig) -> Result<Topic<D>, HubError> {
        let mut topics = self.topics.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if topics.contains_key(&config.name) {
            return Err(HubError::AlreadyExists {
                kind: "topic",
                name: config.name,
            });
        }
        let topic = Topic::with_clock(config.clone(), self.clock.clone());
        topics.insert(config.name, topic.clone());
        Ok(topic)
    }

    /// Look up an existing topic by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no topic with that name exists.
    pub fn get(&self, name: &str) -> Result<Topic<D>, HubError> {
        self.topics
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::NotFound {
                kind: "topic",
                name: name.to_string(),
            })
    }

    /// Names of every registered topic.
    #[must_use]
    pub fn list_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Remove a topic from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] if no topic with that name exists.
    pub fn delete(&self, name: &str) -> Result<(), HubError> {
        self.topics
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HubError::NotFound {
                kind: "topic",
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhub_core::clock::system_clock;

    fn manager() -> TopicManager<u32> {
        TopicManager::new(system_clock())
    }

    #[test]
    fn create_then_get_round_trips() {
        let mgr = manager();
        mgr.create(TopicConfig::new("user-activity").unwrap()).unwrap();
        let topic = mgr.get("user-activity").unwrap();
        assert_eq!(topic.name(), "user-activity");
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let mgr = manager();
        mgr.create(TopicConfig::new("user-activity").unwrap()).unwrap();
        let err = mgr.create(TopicConfig::new("user-activity").unwrap()).unwrap_err();
        assert!(matches!(err, HubError::AlreadyExists { .. }));
    }

    #[test]
    fn list_topics_is_sorted() {
        let mgr = manager();
        mgr.create(TopicConfig::new("b").unwrap()).unwrap();
        mgr.create(TopicConfig::new("a").unwrap()).unwrap();
        assert_eq!(mgr.list_topics(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn delete_removes_the_topic() {
        let mgr = manager();
        mgr.create(TopicConfig::new("user-activity").unwrap()).unwrap();
        mgr.delete("user-activity").unwrap();
        assert!(mgr.get("user-activity").is_err());
    }
}
