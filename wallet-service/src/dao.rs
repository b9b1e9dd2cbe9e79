use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use saga_core::TxKind;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Narrow store contract of the wallet ledger. `append_transaction` persists
/// the ledger record and the new balance in one commit.
#[async_trait]
pub trait WalletStore: Send + Sync + 'static {
    async fn wallet_by_user_id(&self, user_id: Uuid) -> Result<Option<Wallet>>;

    /// Latest ledger record for the order, if any.
    async fn latest_transaction(&self, order_id: Uuid) -> Result<Option<WalletTransaction>>;

    /// Appends a ledger record and writes the wallet's new balance in one
    /// commit.
    async fn append_transaction(
        &self,
        wallet_id: Uuid,
        new_balance: f64,
        order_id: Uuid,
        kind: TxKind,
        cost: f64,
    ) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct PgWalletStore {
    pool: DbPool,
}

impl PgWalletStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn wallet_by_user_id(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let mut conn = self.pool.get().await?;
        let wallet = wallets::table
            .filter(wallets::user_id.eq(user_id))
            .first::<Wallet>(&mut conn)
            .await
            .optional()?;
        Ok(wallet)
    }

    async fn latest_transaction(&self, order_id: Uuid) -> Result<Option<WalletTransaction>> {
        let mut conn = self.pool.get().await?;
        let transaction = wallet_transactions::table
            .filter(wallet_transactions::order_id.eq(order_id))
            .order(wallet_transactions::created_at.desc())
            .first::<WalletTransaction>(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }

    async fn append_transaction(
        &self,
        wallet_id: Uuid,
        new_balance: f64,
        order_id: Uuid,
        kind: TxKind,
        cost: f64,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let record = NewWalletTransaction {
            id: Uuid::new_v4(),
            wallet_id,
            order_id,
            cost,
            kind: kind.as_str().to_string(),
        };

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(wallet_transactions::table)
                    .values(&record)
                    .execute(conn)
                    .await?;

                diesel::update(wallets::table.filter(wallets::id.eq(wallet_id)))
                    .set(wallets::balance.eq(new_balance))
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        wallets::table.count().get_result::<i64>(&mut conn).await?;
        Ok(())
    }
}
