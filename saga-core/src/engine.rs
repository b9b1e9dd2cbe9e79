use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapter::{ResourceAdapter, Transaction, TxKind};
use crate::broker::Broker;
use crate::error::SagaError;
use crate::messages::{topics, NewOrderMsg, OrderRejectedMsg, OrderSuccessMsg, ReasonCode, ServiceTag};
use crate::pipe::{transaction_pipe, TransactionPipe};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the transaction pipe.
    pub pipe_capacity: usize,
    /// How long an enqueue may block before surfacing backpressure.
    pub send_timeout: Duration,
    /// Tick interval of the peer-event polling loops.
    pub poll_tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipe_capacity: 64,
            send_timeout: Duration::from_secs(5),
            poll_tick: Duration::from_millis(500),
        }
    }
}

/// Per-service saga transaction engine: bounded pipe, single-consumer
/// processor, reservation/compensation handlers, and outcome publication.
/// Structurally identical across the three services; only the
/// `ResourceAdapter` and the identity tag differ.
pub struct SagaEngine<A: ResourceAdapter, B: Broker> {
    pub(crate) service: ServiceTag,
    pub(crate) adapter: A,
    pub(crate) broker: B,
    pub(crate) pipe: TransactionPipe<A::Delta>,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: EngineConfig,
}

impl<A: ResourceAdapter, B: Broker> SagaEngine<A, B> {
    /// Builds the engine and hands back the receiving half of the pipe,
    /// which must be given to exactly one `run` call.
    pub fn new(
        service: ServiceTag,
        adapter: A,
        broker: B,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Transaction<A::Delta>>) {
        let (pipe, rx) = transaction_pipe(config.pipe_capacity, config.send_timeout);
        let engine = Self {
            service,
            adapter,
            broker,
            pipe,
            cancel,
            config,
        };
        (engine, rx)
    }

    pub fn service(&self) -> ServiceTag {
        self.service
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Entry point for new orders, used by the new-order consumer and by the
    /// registry's HTTP layer. `SagaError::PipeTimeout` is the caller's
    /// overload signal.
    pub async fn enqueue_reservation(&self, order: &NewOrderMsg) -> Result<(), SagaError> {
        let delta = self.adapter.reservation_delta(order)?;
        let transaction = Transaction::reservation(order.order_id, order.user_id, delta);
        self.pipe.enqueue(transaction, &self.cancel).await
    }

    /// Entry point for unwinding an order after a peer rejected it.
    pub async fn enqueue_compensation(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        reason: ReasonCode,
    ) -> Result<(), SagaError> {
        let delta = self.adapter.compensation_delta(order_id, user_id).await?;
        let transaction = Transaction::compensation(order_id, user_id, delta, reason);
        self.pipe.enqueue(transaction, &self.cancel).await
    }

    /// Single-consumer processor loop. Mutations of the local resource all
    /// happen here, so they are serialized without extra locking. On
    /// cancellation the remaining queued transactions (including
    /// compensations re-enqueued while draining) are processed before the
    /// loop exits.
    pub async fn run(&self, mut rx: mpsc::Receiver<Transaction<A::Delta>>) {
        info!(service = %self.service, "saga processor started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    while let Ok(transaction) = rx.try_recv() {
                        self.dispatch(transaction).await;
                    }
                    break;
                }
                next = rx.recv() => match next {
                    Some(transaction) => self.dispatch(transaction).await,
                    None => break,
                },
            }
        }
        info!(service = %self.service, "saga processor drained and stopped");
    }

    async fn dispatch(&self, mut transaction: Transaction<A::Delta>) {
        match transaction.kind {
            TxKind::Reservation => match self.process_reservation(&transaction).await {
                Ok(()) => {
                    if let Err(e) = self.publish_success(transaction.order_id).await {
                        error!(order_id = %transaction.order_id, "send success msg error: {e:#}");
                    }
                }
                Err(err) => {
                    let reason = err.reason_code();
                    warn!(
                        order_id = %transaction.order_id,
                        ?reason,
                        "process reservation error: {err:#}"
                    );

                    let rejected = OrderRejectedMsg {
                        order_id: transaction.order_id,
                        user_id: transaction.user_id,
                        service: self.service,
                        reason_code: reason,
                    };

                    transaction.kind = TxKind::Compensation;
                    transaction.reason = reason;
                    // Fresh token: the self-healing compensation must still
                    // enter the pipe while the engine is draining on shutdown.
                    if let Err(e) = self
                        .pipe
                        .enqueue(transaction, &CancellationToken::new())
                        .await
                    {
                        error!("re-enqueue compensation error: {e}");
                    }

                    if let Err(e) = self.publish_rejected(&rejected).await {
                        error!(order_id = %rejected.order_id, "send rejected msg error: {e:#}");
                    }
                }
            },
            TxKind::Compensation => {
                if let Err(e) = self.process_compensation(&transaction).await {
                    error!(order_id = %transaction.order_id, "process compensation error: {e:#}");
                }
            }
        }
    }

    /// Reservation handler: idempotency floor, then check-and-apply through
    /// the adapter. A duplicate delivery is a success-as-no-op.
    async fn process_reservation(&self, transaction: &Transaction<A::Delta>) -> Result<(), SagaError> {
        if self.adapter.latest_record(transaction.order_id).await?.is_some() {
            info!(order_id = %transaction.order_id, "duplicate reservation delivery, skipping");
            return Ok(());
        }
        self.adapter.reserve(transaction).await
    }

    /// Compensation handler: idempotent unwind. A missing record means the
    /// reservation never took local effect; an existing compensation record
    /// means a duplicate rejection delivery. Both are no-op successes.
    async fn process_compensation(
        &self,
        transaction: &Transaction<A::Delta>,
    ) -> Result<(), SagaError> {
        match self.adapter.latest_record(transaction.order_id).await? {
            None => {
                info!(order_id = %transaction.order_id, "no reservation on record, nothing to unwind");
                Ok(())
            }
            Some(TxKind::Compensation) => {
                info!(order_id = %transaction.order_id, "order already compensated, skipping");
                Ok(())
            }
            Some(TxKind::Reservation) => self.adapter.release(transaction).await,
        }
    }

    async fn publish_success(&self, order_id: Uuid) -> anyhow::Result<()> {
        let msg = OrderSuccessMsg {
            order_id,
            service: self.service,
        };
        self.broker
            .publish(topics::ORDER_SUCCESS, serde_json::to_vec(&msg)?)
            .await
    }

    async fn publish_rejected(&self, msg: &OrderRejectedMsg) -> anyhow::Result<()> {
        self.broker
            .publish(topics::REJECTED_ORDERS, serde_json::to_vec(msg)?)
            .await
    }
}
