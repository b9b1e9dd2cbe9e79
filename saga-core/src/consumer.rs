use tracing::{debug, error};

use crate::adapter::ResourceAdapter;
use crate::broker::Broker;
use crate::engine::SagaEngine;
use crate::messages::{topics, NewOrderMsg, OrderRejectedMsg};

/// Peer-event polling loops. No push semantics are assumed of the broker:
/// each loop polls its topic on a fixed tick, logs and continues on poll or
/// decode errors, and treats an empty poll as "nothing to do this tick".
impl<A: ResourceAdapter, B: Broker> SagaEngine<A, B> {
    /// Consumes the new-order topic and enqueues a reservation for each
    /// order. Run by the storage and wallet services; the registry is the
    /// producer of these messages, not a consumer.
    pub async fn run_new_order_consumer(&self) {
        let mut tick = tokio::time::interval(self.config.poll_tick);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    let payload = match self.broker.poll(topics::NEW_ORDERS).await {
                        Ok(Some(payload)) => payload,
                        Ok(None) => continue,
                        Err(e) => {
                            error!("get new order msg err: {e:#}");
                            continue;
                        }
                    };

                    let msg: NewOrderMsg = match serde_json::from_slice(&payload) {
                        Ok(msg) => msg,
                        Err(e) => {
                            error!("decode new order msg err: {e}");
                            continue;
                        }
                    };

                    debug!(order_id = %msg.order_id, "new order msg");
                    if let Err(e) = self.enqueue_reservation(&msg).await {
                        error!(order_id = %msg.order_id, "new order reservation err: {e}");
                    }
                }
            }
        }
    }

    /// Consumes the rejected-order topic and enqueues a compensation for the
    /// local resource. Messages carrying this service's own identity tag are
    /// discarded, otherwise a service would unwind in reaction to a
    /// rejection it published itself.
    pub async fn run_rejection_consumer(&self) {
        let mut tick = tokio::time::interval(self.config.poll_tick);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    let payload = match self.broker.poll(topics::REJECTED_ORDERS).await {
                        Ok(Some(payload)) => payload,
                        Ok(None) => continue,
                        Err(e) => {
                            error!("get order rejected msg err: {e:#}");
                            continue;
                        }
                    };

                    let msg: OrderRejectedMsg = match serde_json::from_slice(&payload) {
                        Ok(msg) => msg,
                        Err(e) => {
                            error!("decode order rejected msg err: {e}");
                            continue;
                        }
                    };

                    if msg.service == self.service {
                        debug!(order_id = %msg.order_id, "own rejection msg, skipping");
                        continue;
                    }

                    debug!(order_id = %msg.order_id, from = %msg.service, "rejected order msg");
                    if let Err(e) = self
                        .enqueue_compensation(msg.order_id, msg.user_id, msg.reason_code)
                        .await
                    {
                        error!(order_id = %msg.order_id, "rejected order compensation err: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::adapter::{Transaction, TxKind};
    use crate::broker::memory::InMemoryBroker;
    use crate::engine::EngineConfig;
    use crate::error::SagaError;
    use crate::messages::{OrderItemMsg, ReasonCode, ServiceTag};

    use async_trait::async_trait;

    /// Pass-through adapter: the delta is the order's total item count.
    struct UnitAdapter;

    #[async_trait]
    impl ResourceAdapter for UnitAdapter {
        type Delta = i32;

        fn reservation_delta(&self, order: &NewOrderMsg) -> Result<i32, SagaError> {
            Ok(order.order_items.iter().map(|i| i.count).sum())
        }

        async fn compensation_delta(&self, _order_id: Uuid, _user_id: Uuid) -> Result<i32, SagaError> {
            Ok(0)
        }

        async fn latest_record(&self, _order_id: Uuid) -> Result<Option<TxKind>, SagaError> {
            Ok(None)
        }

        async fn reserve(&self, _tx: &Transaction<i32>) -> Result<(), SagaError> {
            Ok(())
        }

        async fn release(&self, _tx: &Transaction<i32>) -> Result<(), SagaError> {
            Ok(())
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            pipe_capacity: 8,
            send_timeout: Duration::from_millis(200),
            poll_tick: Duration::from_millis(5),
        }
    }

    fn rejection(service: ServiceTag, order_id: Uuid) -> OrderRejectedMsg {
        OrderRejectedMsg {
            order_id,
            user_id: Uuid::new_v4(),
            service,
            reason_code: ReasonCode::OutOfStock,
        }
    }

    #[tokio::test]
    async fn new_order_msg_becomes_reservation_transaction() {
        let broker = Arc::new(InMemoryBroker::new());
        let cancel = CancellationToken::new();
        let (engine, mut rx) = SagaEngine::new(
            ServiceTag::Wallet,
            UnitAdapter,
            broker.clone(),
            test_config(),
            cancel.clone(),
        );
        let engine = Arc::new(engine);

        let order_id = Uuid::new_v4();
        let msg = NewOrderMsg {
            user_id: Uuid::new_v4(),
            order_id,
            order_items: vec![OrderItemMsg {
                order_id,
                product_id: Uuid::new_v4(),
                count: 2,
                product_price: 3.0,
            }],
        };
        broker
            .publish(topics::NEW_ORDERS, serde_json::to_vec(&msg).unwrap())
            .await
            .unwrap();

        let consumer = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_new_order_consumer().await }
        });

        let transaction = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("consumer should enqueue a transaction")
            .unwrap();
        assert_eq!(transaction.kind, TxKind::Reservation);
        assert_eq!(transaction.order_id, order_id);
        assert_eq!(transaction.delta, 2);

        cancel.cancel();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn own_rejection_messages_are_filtered() {
        let broker = Arc::new(InMemoryBroker::new());
        let cancel = CancellationToken::new();
        let (engine, mut rx) = SagaEngine::new(
            ServiceTag::Storage,
            UnitAdapter,
            broker.clone(),
            test_config(),
            cancel.clone(),
        );
        let engine = Arc::new(engine);

        let own_order = Uuid::new_v4();
        let peer_order = Uuid::new_v4();
        for msg in [
            rejection(ServiceTag::Storage, own_order),
            rejection(ServiceTag::Wallet, peer_order),
        ] {
            broker
                .publish(topics::REJECTED_ORDERS, serde_json::to_vec(&msg).unwrap())
                .await
                .unwrap();
        }

        let consumer = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_rejection_consumer().await }
        });

        // Only the peer's rejection makes it onto the pipe, and it shows up
        // even though the self-tagged message was queued first.
        let transaction = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("peer rejection should be enqueued")
            .unwrap();
        assert_eq!(transaction.kind, TxKind::Compensation);
        assert_eq!(transaction.order_id, peer_order);
        assert_eq!(transaction.reason, ReasonCode::OutOfStock);

        assert!(rx.try_recv().is_err());

        cancel.cancel();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn poll_errors_do_not_stop_the_loop() {
        // A broker that always fails; the loop must keep ticking until
        // cancelled rather than exiting on the first error.
        struct FailingBroker;

        #[async_trait]
        impl Broker for FailingBroker {
            async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("broker down"))
            }

            async fn poll(&self, _topic: &str) -> anyhow::Result<Option<Vec<u8>>> {
                Err(anyhow::anyhow!("broker down"))
            }

            async fn health_check(&self) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("broker down"))
            }
        }

        let cancel = CancellationToken::new();
        let (engine, _rx) = SagaEngine::new(
            ServiceTag::Wallet,
            UnitAdapter,
            FailingBroker,
            test_config(),
            cancel.clone(),
        );
        let engine = Arc::new(engine);

        let consumer = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_new_order_consumer().await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!consumer.is_finished());

        cancel.cancel();
        consumer.await.unwrap();
    }
}
