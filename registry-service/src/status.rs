use std::time::Duration;

use anyhow::Result;
use saga_core::{topics, Broker, OrderSuccessMsg, ServiceTag};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dao::OrderStore;
use crate::models::OrderStatus;

/// Feeds peer success acknowledgements into the order status machine:
/// `pending` moves to `paid` or `reserved` after the first acknowledgement
/// and to `completed` once both sides have confirmed. Terminal orders ignore
/// late acknowledgements.
pub struct StatusTracker<S: OrderStore, B: Broker> {
    store: S,
    broker: B,
    cancel: CancellationToken,
    poll_tick: Duration,
}

impl<S: OrderStore, B: Broker> StatusTracker<S, B> {
    pub fn new(store: S, broker: B, cancel: CancellationToken, poll_tick: Duration) -> Self {
        Self {
            store,
            broker,
            cancel,
            poll_tick,
        }
    }

    /// Polling loop over the success topic. Same contract as the engine's
    /// consumers: log and continue on poll or decode errors.
    pub async fn run(&self) {
        let mut tick = tokio::time::interval(self.poll_tick);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    let payload = match self.broker.poll(topics::ORDER_SUCCESS).await {
                        Ok(Some(payload)) => payload,
                        Ok(None) => continue,
                        Err(e) => {
                            error!("get order success msg err: {e:#}");
                            continue;
                        }
                    };

                    let msg: OrderSuccessMsg = match serde_json::from_slice(&payload) {
                        Ok(msg) => msg,
                        Err(e) => {
                            error!("decode order success msg err: {e}");
                            continue;
                        }
                    };

                    if let Err(e) = self.apply_success(&msg).await {
                        error!(order_id = %msg.order_id, "apply order success err: {e:#}");
                    }
                }
            }
        }
    }

    pub async fn apply_success(&self, msg: &OrderSuccessMsg) -> Result<()> {
        let Some(order) = self.store.order_by_id(msg.order_id).await? else {
            warn!(order_id = %msg.order_id, "success msg for unknown order");
            return Ok(());
        };

        let status: OrderStatus = order.status.parse()?;
        if status.is_terminal() {
            debug!(order_id = %msg.order_id, %status, "terminal order, success msg ignored");
            return Ok(());
        }

        // One acknowledgement per side. The opposite partial state means the
        // other side already confirmed, so this message finishes the order.
        let next = match msg.service {
            ServiceTag::Registry => return Ok(()),
            ServiceTag::Storage if status == OrderStatus::Paid => OrderStatus::Completed,
            ServiceTag::Storage => OrderStatus::Reserved,
            ServiceTag::Wallet if status == OrderStatus::Reserved => OrderStatus::Completed,
            ServiceTag::Wallet => OrderStatus::Paid,
        };

        self.store.update_status(msg.order_id, next, None).await?;
        info!(order_id = %msg.order_id, from = %msg.service, %next, "order status updated");
        Ok(())
    }
}
