use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::stock_items)]
pub struct StockItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub count: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::stock_transactions)]
pub struct StockTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub kind: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_transactions)]
pub struct NewStockTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub kind: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::stock_transaction_items)]
pub struct StockTransactionItem {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub product_id: Uuid,
    pub count: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_transaction_items)]
pub struct NewStockTransactionItem {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub product_id: Uuid,
    pub count: i32,
}
