use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic names shared by all three services.
pub mod topics {
    pub const NEW_ORDERS: &str = "new-orders";
    pub const REJECTED_ORDERS: &str = "rejected-orders";
    pub const ORDER_SUCCESS: &str = "order-success";
    pub const HEALTH_CHECK: &str = "healthcheck";
}

/// Identity tag a service stamps on its outbound messages. Used by the
/// rejection consumer to discard messages a service published itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTag {
    Registry,
    Storage,
    Wallet,
}

impl std::fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceTag::Registry => f.write_str("registry"),
            ServiceTag::Storage => f.write_str("storage"),
            ServiceTag::Wallet => f.write_str("wallet"),
        }
    }
}

/// Why an order was rejected. `Ok` only ever appears as the "no failure"
/// value inside the engine, never on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Ok,
    NotEnoughMoney,
    OutOfStock,
    InternalError,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasonCode::Ok => f.write_str("ok"),
            ReasonCode::NotEnoughMoney => f.write_str("not_enough_money"),
            ReasonCode::OutOfStock => f.write_str("out_of_stock"),
            ReasonCode::InternalError => f.write_str("internal_error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemMsg {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub count: i32,
    pub product_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderMsg {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub order_items: Vec<OrderItemMsg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedMsg {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub service: ServiceTag,
    pub reason_code: ReasonCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSuccessMsg {
    pub order_id: Uuid,
    pub service: ServiceTag,
}

impl NewOrderMsg {
    /// Total cost of the order, the amount the wallet side debits.
    pub fn total_cost(&self) -> f64 {
        self.order_items
            .iter()
            .map(|item| item.product_price * f64::from(item.count))
            .sum()
    }
}
