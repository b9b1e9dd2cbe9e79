use thiserror::Error;

use crate::messages::ReasonCode;

/// Failure taxonomy of the saga engine.
///
/// Duplicate deliveries and missing records are deliberately absent: both are
/// normal signals, surfaced as early successes or `Option::None` lookups in
/// the handlers rather than as errors.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The transaction pipe stayed full past the send timeout. The caller's
    /// signal to apply backpressure; never raised by the processor itself.
    #[error("transaction pipe send timed out")]
    PipeTimeout,

    /// Wallet balance would go negative.
    #[error("not enough money for order")]
    NotEnoughMoney,

    /// Stock count for at least one requested product would go negative.
    #[error("not enough stock for order")]
    OutOfStock,

    /// Store or broker failure. Indistinguishable from a business rejection
    /// for peers; both compensate on it.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SagaError {
    /// Classification published to peers in a rejection message.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            SagaError::NotEnoughMoney => ReasonCode::NotEnoughMoney,
            SagaError::OutOfStock => ReasonCode::OutOfStock,
            SagaError::PipeTimeout | SagaError::Internal(_) => ReasonCode::InternalError,
        }
    }
}
