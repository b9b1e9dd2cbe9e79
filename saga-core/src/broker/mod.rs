pub mod kafka;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Narrow message-bus contract the engine consumes. Transport and connection
/// details stay behind it: Kafka in deployment, an in-memory queue in tests.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publishes one message to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Fetches at most one pending message from a topic. `Ok(None)` means
    /// "nothing to do this tick", not an error.
    async fn poll(&self, topic: &str) -> Result<Option<Vec<u8>>>;

    /// Round-trips a synthetic message through the dedicated health-check
    /// topic.
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        (**self).publish(topic, payload).await
    }

    async fn poll(&self, topic: &str) -> Result<Option<Vec<u8>>> {
        (**self).poll(topic).await
    }

    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }
}
