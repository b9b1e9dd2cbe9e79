use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::Broker;
use crate::messages::topics;

/// Queue-per-topic broker. Backs the test suites of all three services and
/// doubles as a single-process deployment mode.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of undelivered messages on a topic.
    pub fn pending(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn poll(&self, topic: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .topics
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(VecDeque::pop_front))
    }

    async fn health_check(&self) -> Result<()> {
        self.publish(topics::HEALTH_CHECK, b"ping".to_vec()).await?;
        match self.poll(topics::HEALTH_CHECK).await? {
            Some(_) => Ok(()),
            None => bail!("health-check message did not round-trip"),
        }
    }
}
