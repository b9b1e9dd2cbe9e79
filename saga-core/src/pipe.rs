use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::Transaction;
use crate::error::SagaError;

/// Sending half of the bounded in-process transaction queue that decouples
/// producers (HTTP entry points, peer-event consumers) from the single
/// processor task.
pub struct TransactionPipe<D> {
    tx: mpsc::Sender<Transaction<D>>,
    send_timeout: Duration,
}

impl<D> Clone for TransactionPipe<D> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            send_timeout: self.send_timeout,
        }
    }
}

/// Opens a pipe of the given capacity. The receiver goes to the processor
/// task; the `TransactionPipe` can be cloned freely to producers.
pub fn transaction_pipe<D>(
    capacity: usize,
    send_timeout: Duration,
) -> (TransactionPipe<D>, mpsc::Receiver<Transaction<D>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (TransactionPipe { tx, send_timeout }, rx)
}

impl<D> TransactionPipe<D> {
    /// Blocks until the queue accepts the transaction, the send timeout
    /// elapses (`SagaError::PipeTimeout`, the backpressure signal), or the
    /// cancellation token fires (non-error no-op abort). Nothing is ever
    /// silently dropped on success.
    pub async fn enqueue(
        &self,
        transaction: Transaction<D>,
        cancel: &CancellationToken,
    ) -> Result<(), SagaError> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            sent = tokio::time::timeout(self.send_timeout, self.tx.send(transaction)) => {
                match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SagaError::Internal(anyhow!("transaction pipe closed"))),
                    Err(_) => Err(SagaError::PipeTimeout),
                }
            }
        }
    }
}
