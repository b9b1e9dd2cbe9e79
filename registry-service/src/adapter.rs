use anyhow::anyhow;
use async_trait::async_trait;
use saga_core::{
    topics, Broker, NewOrderMsg, OrderItemMsg, ResourceAdapter, SagaError, Transaction, TxKind,
};
use uuid::Uuid;

use crate::dao::OrderStore;
use crate::models::{NewOrder, NewOrderItem, OrderStatus};

#[derive(Debug, Clone)]
pub struct DraftItem {
    pub product_id: Uuid,
    pub count: i32,
    pub product_price: f64,
}

/// The order lines to be written when the reservation lands. Empty for
/// compensations, which only flip the status of an existing row.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub items: Vec<DraftItem>,
}

/// Order-row resource. Reserving creates the pending order and announces it
/// to the peers on the new-order topic; releasing marks the order rejected
/// with the peer's reason. The row itself is the idempotency record: a
/// missing row means the reservation never landed, a `rejected` status means
/// the order is already unwound.
pub struct OrderAdapter<S: OrderStore, B: Broker> {
    store: S,
    broker: B,
}

impl<S: OrderStore, B: Broker> OrderAdapter<S, B> {
    pub fn new(store: S, broker: B) -> Self {
        Self { store, broker }
    }
}

#[async_trait]
impl<S: OrderStore, B: Broker> ResourceAdapter for OrderAdapter<S, B> {
    type Delta = OrderDraft;

    fn reservation_delta(&self, order: &NewOrderMsg) -> Result<OrderDraft, SagaError> {
        Ok(OrderDraft {
            items: order
                .order_items
                .iter()
                .map(|item| DraftItem {
                    product_id: item.product_id,
                    count: item.count,
                    product_price: item.product_price,
                })
                .collect(),
        })
    }

    async fn compensation_delta(
        &self,
        _order_id: Uuid,
        _user_id: Uuid,
    ) -> Result<OrderDraft, SagaError> {
        Ok(OrderDraft { items: vec![] })
    }

    async fn latest_record(&self, order_id: Uuid) -> Result<Option<TxKind>, SagaError> {
        let Some(order) = self.store.order_by_id(order_id).await? else {
            return Ok(None);
        };
        match order.status.parse::<OrderStatus>()? {
            OrderStatus::Rejected => Ok(Some(TxKind::Compensation)),
            _ => Ok(Some(TxKind::Reservation)),
        }
    }

    async fn reserve(&self, tx: &Transaction<OrderDraft>) -> Result<(), SagaError> {
        if tx.delta.items.is_empty() {
            return Err(SagaError::Internal(anyhow!(
                "order {} has no items",
                tx.order_id
            )));
        }

        let order = NewOrder {
            id: tx.order_id,
            user_id: tx.user_id,
            status: OrderStatus::Pending.as_str().to_string(),
        };
        let items: Vec<NewOrderItem> = tx
            .delta
            .items
            .iter()
            .map(|item| NewOrderItem {
                id: Uuid::new_v4(),
                order_id: tx.order_id,
                product_id: item.product_id,
                count: item.count,
                product_price: item.product_price,
            })
            .collect();
        self.store.create_order(order, items).await?;

        // Only announce an order that is actually on record. A publish
        // failure rejects the order and the self-healing compensation marks
        // the row rejected.
        let msg = NewOrderMsg {
            user_id: tx.user_id,
            order_id: tx.order_id,
            order_items: tx
                .delta
                .items
                .iter()
                .map(|item| OrderItemMsg {
                    order_id: tx.order_id,
                    product_id: item.product_id,
                    count: item.count,
                    product_price: item.product_price,
                })
                .collect(),
        };
        self.broker
            .publish(
                topics::NEW_ORDERS,
                serde_json::to_vec(&msg).map_err(|e| SagaError::Internal(e.into()))?,
            )
            .await
            .map_err(SagaError::Internal)?;

        Ok(())
    }

    async fn release(&self, tx: &Transaction<OrderDraft>) -> Result<(), SagaError> {
        self.store
            .update_status(tx.order_id, OrderStatus::Rejected, Some(tx.reason))
            .await?;
        Ok(())
    }
}
