//! Per-service saga transaction engine for the choreographed purchase
//! workflow.
//!
//! Three autonomous services (order registry, stock ledger, wallet ledger)
//! coordinate a purchase with no central coordinator: each one runs this
//! engine over its own resource and reacts to peer events on the message
//! bus. The engine owns the bounded transaction pipe, the single-consumer
//! processor with its idempotent reservation/compensation handlers, and the
//! peer-event polling loops. Services plug in a [`ResourceAdapter`] for
//! their local resource and a [`Broker`] for the bus.

pub mod adapter;
pub mod broker;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod messages;
pub mod pipe;

pub use adapter::{ResourceAdapter, Transaction, TxKind};
pub use broker::Broker;
pub use engine::{EngineConfig, SagaEngine};
pub use error::SagaError;
pub use messages::{
    topics, NewOrderMsg, OrderItemMsg, OrderRejectedMsg, OrderSuccessMsg, ReasonCode, ServiceTag,
};
pub use pipe::TransactionPipe;
