use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use saga_core::ReasonCode;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Store contract of the order registry. `create_order` persists the order
/// row and its items in one commit; the order row doubles as the
/// idempotency record of the saga.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    async fn create_order(&self, order: NewOrder, items: Vec<NewOrderItem>) -> Result<()>;

    async fn order_by_id(&self, order_id: Uuid) -> Result<Option<Order>>;

    async fn orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>>;

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>>;

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        reason: Option<ReasonCode>,
    ) -> Result<()>;

    async fn products(&self) -> Result<Vec<Product>>;

    /// Prices of the given products, keyed by product id. Unknown ids are
    /// simply absent from the map.
    async fn price_map(&self, product_ids: &[Uuid]) -> Result<HashMap<Uuid, f64>>;

    async fn health_check(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, order: NewOrder, items: Vec<NewOrderItem>) -> Result<()> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(orders::table)
                    .values(&order)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&items)
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await?;

        Ok(())
    }

    async fn order_by_id(&self, order_id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.get().await?;
        let order = orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let mut conn = self.pool.get().await?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::created_at.desc())
            .load::<Order>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let mut conn = self.pool.get().await?;
        let rows = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .load::<OrderItem>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        reason: Option<ReasonCode>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(orders::table.find(order_id))
            .set((
                orders::status.eq(status.as_str()),
                orders::reason.eq(reason.map(|r| r.to_string())),
                orders::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let mut conn = self.pool.get().await?;
        let rows = products::table.load::<Product>(&mut conn).await?;
        Ok(rows)
    }

    async fn price_map(&self, product_ids: &[Uuid]) -> Result<HashMap<Uuid, f64>> {
        let mut conn = self.pool.get().await?;
        let rows = products::table
            .filter(products::id.eq_any(product_ids))
            .select((products::id, products::price))
            .load::<(Uuid, f64)>(&mut conn)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        orders::table.count().get_result::<i64>(&mut conn).await?;
        Ok(())
    }
}
