use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use saga_core::{NewOrderMsg, ResourceAdapter, SagaError, Transaction, TxKind};
use uuid::Uuid;

use crate::dao::StockStore;
use crate::models::StockItem;

/// One line of an order, as seen by the stock ledger.
#[derive(Debug, Clone)]
pub struct StockLine {
    pub product_id: Uuid,
    pub count: i32,
}

#[derive(Debug, Clone)]
pub struct StockDelta {
    pub lines: Vec<StockLine>,
}

/// Stock-count resource: decrements per-product counts on reservation,
/// restores them on compensation. Counts never go negative; the pre-check
/// rejects with `OutOfStock` before anything is written.
pub struct StockAdapter<S: StockStore> {
    store: S,
}

impl<S: StockStore> StockAdapter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn line_pairs(delta: &StockDelta) -> Vec<(Uuid, i32)> {
        delta
            .lines
            .iter()
            .map(|line| (line.product_id, line.count))
            .collect()
    }
}

#[async_trait]
impl<S: StockStore> ResourceAdapter for StockAdapter<S> {
    type Delta = StockDelta;

    fn reservation_delta(&self, order: &NewOrderMsg) -> Result<StockDelta, SagaError> {
        Ok(StockDelta {
            lines: order
                .order_items
                .iter()
                .map(|item| StockLine {
                    product_id: item.product_id,
                    count: item.count,
                })
                .collect(),
        })
    }

    async fn compensation_delta(
        &self,
        order_id: Uuid,
        _user_id: Uuid,
    ) -> Result<StockDelta, SagaError> {
        let items = self.store.reserved_items(order_id).await?;
        Ok(StockDelta {
            lines: items
                .into_iter()
                .map(|item| StockLine {
                    product_id: item.product_id,
                    count: item.count,
                })
                .collect(),
        })
    }

    async fn latest_record(&self, order_id: Uuid) -> Result<Option<TxKind>, SagaError> {
        match self.store.latest_transaction(order_id).await? {
            None => Ok(None),
            Some(transaction) => Ok(Some(transaction.kind.parse()?)),
        }
    }

    async fn reserve(&self, tx: &Transaction<StockDelta>) -> Result<(), SagaError> {
        let product_ids: Vec<Uuid> = tx.delta.lines.iter().map(|l| l.product_id).collect();
        let mut stock = self.store.stock_by_product_ids(&product_ids).await?;

        {
            let mut by_product: HashMap<Uuid, &mut StockItem> =
                stock.iter_mut().map(|item| (item.product_id, item)).collect();

            for line in &tx.delta.lines {
                let item = by_product.get_mut(&line.product_id).ok_or_else(|| {
                    SagaError::Internal(anyhow!("product {} not in stock ledger", line.product_id))
                })?;

                if item.count < line.count {
                    return Err(SagaError::OutOfStock);
                }
                item.count -= line.count;
            }
        }

        self.store
            .append_transaction(
                tx.order_id,
                TxKind::Reservation,
                &Self::line_pairs(&tx.delta),
                &stock,
            )
            .await?;
        Ok(())
    }

    async fn release(&self, tx: &Transaction<StockDelta>) -> Result<(), SagaError> {
        let product_ids: Vec<Uuid> = tx.delta.lines.iter().map(|l| l.product_id).collect();
        let mut stock = self.store.stock_by_product_ids(&product_ids).await?;

        {
            let mut by_product: HashMap<Uuid, &mut StockItem> =
                stock.iter_mut().map(|item| (item.product_id, item)).collect();

            for line in &tx.delta.lines {
                let item = by_product.get_mut(&line.product_id).ok_or_else(|| {
                    SagaError::Internal(anyhow!("product {} not in stock ledger", line.product_id))
                })?;
                item.count += line.count;
            }
        }

        self.store
            .append_transaction(
                tx.order_id,
                TxKind::Compensation,
                &Self::line_pairs(&tx.delta),
                &stock,
            )
            .await?;
        Ok(())
    }
}
