use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use saga_core::TxKind;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Narrow store contract of the stock ledger. The read side is plain
/// CRUD-by-key; `append_transaction` is the single atomic unit that persists
/// a ledger record together with the new stock counts.
#[async_trait]
pub trait StockStore: Send + Sync + 'static {
    async fn stock_by_product_ids(&self, product_ids: &[Uuid]) -> Result<Vec<StockItem>>;

    /// Latest ledger record for the order, if any.
    async fn latest_transaction(&self, order_id: Uuid) -> Result<Option<StockTransaction>>;

    /// Items of the order's reservation record; empty when the order never
    /// reserved anything here.
    async fn reserved_items(&self, order_id: Uuid) -> Result<Vec<StockTransactionItem>>;

    /// Appends a ledger record with its items and writes the updated counts
    /// in one commit.
    async fn append_transaction(
        &self,
        order_id: Uuid,
        kind: TxKind,
        items: &[(Uuid, i32)],
        updated: &[StockItem],
    ) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct PgStockStore {
    pool: DbPool,
}

impl PgStockStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockStore for PgStockStore {
    async fn stock_by_product_ids(&self, product_ids: &[Uuid]) -> Result<Vec<StockItem>> {
        let mut conn = self.pool.get().await?;
        let items = stock_items::table
            .filter(stock_items::product_id.eq_any(product_ids))
            .load::<StockItem>(&mut conn)
            .await?;
        Ok(items)
    }

    async fn latest_transaction(&self, order_id: Uuid) -> Result<Option<StockTransaction>> {
        let mut conn = self.pool.get().await?;
        let transaction = stock_transactions::table
            .filter(stock_transactions::order_id.eq(order_id))
            .order(stock_transactions::created_at.desc())
            .first::<StockTransaction>(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }

    async fn reserved_items(&self, order_id: Uuid) -> Result<Vec<StockTransactionItem>> {
        let mut conn = self.pool.get().await?;
        let reservation = stock_transactions::table
            .filter(stock_transactions::order_id.eq(order_id))
            .filter(stock_transactions::kind.eq(TxKind::Reservation.as_str()))
            .order(stock_transactions::created_at.desc())
            .first::<StockTransaction>(&mut conn)
            .await
            .optional()?;

        let Some(reservation) = reservation else {
            return Ok(Vec::new());
        };

        let items = stock_transaction_items::table
            .filter(stock_transaction_items::transaction_id.eq(reservation.id))
            .load::<StockTransactionItem>(&mut conn)
            .await?;
        Ok(items)
    }

    async fn append_transaction(
        &self,
        order_id: Uuid,
        kind: TxKind,
        items: &[(Uuid, i32)],
        updated: &[StockItem],
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let record = NewStockTransaction {
            id: Uuid::new_v4(),
            order_id,
            kind: kind.as_str().to_string(),
        };
        let item_rows: Vec<NewStockTransactionItem> = items
            .iter()
            .map(|(product_id, count)| NewStockTransactionItem {
                id: Uuid::new_v4(),
                transaction_id: record.id,
                product_id: *product_id,
                count: *count,
            })
            .collect();
        let updated = updated.to_vec();

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(stock_transactions::table)
                    .values(&record)
                    .execute(conn)
                    .await?;

                diesel::insert_into(stock_transaction_items::table)
                    .values(&item_rows)
                    .execute(conn)
                    .await?;

                for item in &updated {
                    diesel::update(stock_items::table.filter(stock_items::id.eq(item.id)))
                        .set(stock_items::count.eq(item.count))
                        .execute(conn)
                        .await?;
                }

                Ok(())
            })
        })
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        stock_items::table.count().get_result::<i64>(&mut conn).await?;
        Ok(())
    }
}
