use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SagaError;
use crate::messages::{NewOrderMsg, ReasonCode};

/// Kind of saga work. A failed `Reservation` is rewritten in place to
/// `Compensation` before being re-enqueued; there is no third kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Reservation,
    Compensation,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Reservation => "reservation",
            TxKind::Compensation => "compensation",
        }
    }
}

impl std::str::FromStr for TxKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(TxKind::Reservation),
            "compensation" => Ok(TxKind::Compensation),
            other => Err(anyhow::anyhow!("unknown transaction kind: {other}")),
        }
    }
}

/// Unit of saga work local to one service. Ephemeral: it lives on the
/// transaction pipe and is consumed once per enqueue; its durable effect is
/// the service's append-only transaction record.
#[derive(Debug, Clone)]
pub struct Transaction<D> {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub delta: D,
    pub kind: TxKind,
    /// For compensations, the classified failure that caused the unwind.
    /// `Ok` on reservations.
    pub reason: ReasonCode,
}

impl<D> Transaction<D> {
    pub fn reservation(order_id: Uuid, user_id: Uuid, delta: D) -> Self {
        Self {
            order_id,
            user_id,
            delta,
            kind: TxKind::Reservation,
            reason: ReasonCode::Ok,
        }
    }

    pub fn compensation(order_id: Uuid, user_id: Uuid, delta: D, reason: ReasonCode) -> Self {
        Self {
            order_id,
            user_id,
            delta,
            kind: TxKind::Compensation,
            reason,
        }
    }
}

/// Capability the engine needs from the local resource: derive a delta from
/// an incoming order, check-and-apply it, and reverse it. One implementation
/// per service (order row, stock counts, wallet balance).
///
/// `reserve` and `release` must persist the transaction record and the
/// updated resource state in a single atomic unit at the storage layer. The
/// preceding read-check is safe outside that unit because the engine's
/// single consumer serializes all local mutations.
#[async_trait]
pub trait ResourceAdapter: Send + Sync + 'static {
    /// The quantity this service debits or restores: stock lines, an order
    /// draft, or a cost.
    type Delta: Clone + Send + Sync + 'static;

    /// Maps an incoming order onto the local resource delta.
    fn reservation_delta(&self, order: &NewOrderMsg) -> Result<Self::Delta, SagaError>;

    /// Reconstructs the delta to reverse for a rejected order, typically from
    /// the service's own transaction ledger. An empty delta is fine when no
    /// reservation ever took local effect; the compensation handler will
    /// no-op on the missing record.
    async fn compensation_delta(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self::Delta, SagaError>;

    /// Kind of the latest non-superseded transaction record for the order,
    /// if any. The idempotency floor for both handlers.
    async fn latest_record(&self, order_id: Uuid) -> Result<Option<TxKind>, SagaError>;

    /// Validates sufficiency, applies the delta, and appends a `Reservation`
    /// record. Insufficiency must surface as the matching typed `SagaError`
    /// and leave both the resource and the ledger untouched.
    async fn reserve(&self, tx: &Transaction<Self::Delta>) -> Result<(), SagaError>;

    /// Reverses the delta and appends a `Compensation` record. Never fails on
    /// insufficiency; reversing only adds resource back.
    async fn release(&self, tx: &Transaction<Self::Delta>) -> Result<(), SagaError>;
}
