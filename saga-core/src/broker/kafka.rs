use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;

use super::Broker;
use crate::messages::topics;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-backed broker: one shared producer plus one consumer per polled
/// topic, each in its own consumer group so the services do not steal each
/// other's messages on shared topics.
pub struct KafkaBroker {
    producer: FutureProducer,
    consumers: HashMap<String, StreamConsumer>,
    recv_timeout: Duration,
}

impl KafkaBroker {
    /// `poll_topics` lists the topics this service will consume; the
    /// health-check topic is always included.
    pub fn new(
        brokers: &str,
        group_id: &str,
        poll_topics: &[&str],
        recv_timeout: Duration,
    ) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("creating kafka producer")?;

        let mut consumers = HashMap::new();
        for topic in poll_topics.iter().copied().chain([topics::HEALTH_CHECK]) {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("group.id", format!("{group_id}-{topic}"))
                .set("bootstrap.servers", brokers)
                .set("enable.partition.eof", "false")
                .set("session.timeout.ms", "6000")
                .set("enable.auto.commit", "true")
                .create()
                .with_context(|| format!("creating kafka consumer for {topic}"))?;
            consumer
                .subscribe(&[topic])
                .with_context(|| format!("subscribing to {topic}"))?;
            consumers.insert(topic.to_string(), consumer);
        }

        Ok(Self {
            producer,
            consumers,
            recv_timeout,
        })
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let record = FutureRecord::<(), _>::to(topic).payload(&payload);
        self.producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| anyhow!("publishing to {topic}: {e}"))?;
        Ok(())
    }

    async fn poll(&self, topic: &str) -> Result<Option<Vec<u8>>> {
        let consumer = self
            .consumers
            .get(topic)
            .ok_or_else(|| anyhow!("no consumer subscribed to {topic}"))?;

        match tokio::time::timeout(self.recv_timeout, consumer.recv()).await {
            Ok(Ok(message)) => Ok(message.payload().map(<[u8]>::to_vec)),
            Ok(Err(e)) => Err(anyhow!("receiving from {topic}: {e}")),
            Err(_) => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<()> {
        self.publish(topics::HEALTH_CHECK, b"ping".to_vec()).await?;
        match self.poll(topics::HEALTH_CHECK).await? {
            Some(_) => Ok(()),
            None => bail!("health-check message did not round-trip"),
        }
    }
}
