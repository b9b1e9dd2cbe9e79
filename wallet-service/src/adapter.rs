use anyhow::anyhow;
use async_trait::async_trait;
use saga_core::{NewOrderMsg, ResourceAdapter, SagaError, Transaction, TxKind};
use uuid::Uuid;

use crate::dao::WalletStore;

/// The amount a reservation debits from the user's wallet.
#[derive(Debug, Clone, Copy)]
pub struct PaymentDelta {
    pub cost: f64,
}

/// Wallet-balance resource: debits the order's total cost on reservation,
/// credits it back on compensation. The balance never goes negative; the
/// pre-check rejects with `NotEnoughMoney` before anything is written.
pub struct WalletAdapter<S: WalletStore> {
    store: S,
}

impl<S: WalletStore> WalletAdapter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: WalletStore> ResourceAdapter for WalletAdapter<S> {
    type Delta = PaymentDelta;

    fn reservation_delta(&self, order: &NewOrderMsg) -> Result<PaymentDelta, SagaError> {
        Ok(PaymentDelta {
            cost: order.total_cost(),
        })
    }

    async fn compensation_delta(
        &self,
        order_id: Uuid,
        _user_id: Uuid,
    ) -> Result<PaymentDelta, SagaError> {
        // The amount to restore comes from the recorded debit, not from the
        // rejection message. Zero when nothing was ever debited; the
        // compensation handler no-ops on the missing record anyway.
        let cost = self
            .store
            .latest_transaction(order_id)
            .await?
            .map_or(0.0, |t| t.cost);
        Ok(PaymentDelta { cost })
    }

    async fn latest_record(&self, order_id: Uuid) -> Result<Option<TxKind>, SagaError> {
        match self.store.latest_transaction(order_id).await? {
            None => Ok(None),
            Some(transaction) => Ok(Some(transaction.kind.parse()?)),
        }
    }

    async fn reserve(&self, tx: &Transaction<PaymentDelta>) -> Result<(), SagaError> {
        let wallet = self
            .store
            .wallet_by_user_id(tx.user_id)
            .await?
            .ok_or_else(|| SagaError::Internal(anyhow!("no wallet for user {}", tx.user_id)))?;

        if wallet.balance < tx.delta.cost {
            return Err(SagaError::NotEnoughMoney);
        }

        self.store
            .append_transaction(
                wallet.id,
                wallet.balance - tx.delta.cost,
                tx.order_id,
                TxKind::Reservation,
                tx.delta.cost,
            )
            .await?;
        Ok(())
    }

    async fn release(&self, tx: &Transaction<PaymentDelta>) -> Result<(), SagaError> {
        let wallet = self
            .store
            .wallet_by_user_id(tx.user_id)
            .await?
            .ok_or_else(|| SagaError::Internal(anyhow!("no wallet for user {}", tx.user_id)))?;

        self.store
            .append_transaction(
                wallet.id,
                wallet.balance + tx.delta.cost,
                tx.order_id,
                TxKind::Compensation,
                tx.delta.cost,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use saga_core::broker::memory::InMemoryBroker;
    use saga_core::broker::Broker;
    use saga_core::{
        topics, EngineConfig, OrderItemMsg, OrderRejectedMsg, OrderSuccessMsg, ReasonCode,
        SagaEngine, ServiceTag,
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::models::{Wallet, WalletTransaction};

    #[derive(Default)]
    struct MemState {
        wallets: Vec<Wallet>,
        transactions: Vec<WalletTransaction>,
    }

    #[derive(Clone, Default)]
    struct MemWalletStore {
        state: Arc<Mutex<MemState>>,
    }

    impl MemWalletStore {
        fn with_wallet(user_id: Uuid, balance: f64) -> Self {
            let store = Self::default();
            store.state.lock().unwrap().wallets.push(Wallet {
                id: Uuid::new_v4(),
                user_id,
                balance,
                updated_at: None,
            });
            store
        }

        fn balance_of(&self, user_id: Uuid) -> f64 {
            self.state
                .lock()
                .unwrap()
                .wallets
                .iter()
                .find(|w| w.user_id == user_id)
                .map(|w| w.balance)
                .unwrap()
        }

        fn record_kinds(&self, order_id: Uuid) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .transactions
                .iter()
                .filter(|t| t.order_id == order_id)
                .map(|t| t.kind.clone())
                .collect()
        }
    }

    #[async_trait]
    impl WalletStore for MemWalletStore {
        async fn wallet_by_user_id(&self, user_id: Uuid) -> anyhow::Result<Option<Wallet>> {
            let state = self.state.lock().unwrap();
            Ok(state.wallets.iter().find(|w| w.user_id == user_id).cloned())
        }

        async fn latest_transaction(
            &self,
            order_id: Uuid,
        ) -> anyhow::Result<Option<WalletTransaction>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .transactions
                .iter()
                .rev()
                .find(|t| t.order_id == order_id)
                .cloned())
        }

        async fn append_transaction(
            &self,
            wallet_id: Uuid,
            new_balance: f64,
            order_id: Uuid,
            kind: TxKind,
            cost: f64,
        ) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.transactions.push(WalletTransaction {
                id: Uuid::new_v4(),
                wallet_id,
                order_id,
                cost,
                kind: kind.as_str().to_string(),
                created_at: None,
            });
            if let Some(wallet) = state.wallets.iter_mut().find(|w| w.id == wallet_id) {
                wallet.balance = new_balance;
            }
            Ok(())
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn order(order_id: Uuid, user_id: Uuid, count: i32, price: f64) -> NewOrderMsg {
        NewOrderMsg {
            user_id,
            order_id,
            order_items: vec![OrderItemMsg {
                order_id,
                product_id: Uuid::new_v4(),
                count,
                product_price: price,
            }],
        }
    }

    fn engine_over(
        store: MemWalletStore,
    ) -> (
        SagaEngine<WalletAdapter<MemWalletStore>, Arc<InMemoryBroker>>,
        tokio::sync::mpsc::Receiver<Transaction<PaymentDelta>>,
        Arc<InMemoryBroker>,
        CancellationToken,
    ) {
        let broker = Arc::new(InMemoryBroker::new());
        let cancel = CancellationToken::new();
        let config = EngineConfig {
            pipe_capacity: 8,
            send_timeout: Duration::from_millis(200),
            poll_tick: Duration::from_millis(5),
        };
        let (engine, rx) = SagaEngine::new(
            ServiceTag::Wallet,
            WalletAdapter::new(store),
            broker.clone(),
            config,
            cancel.clone(),
        );
        (engine, rx, broker, cancel)
    }

    #[tokio::test]
    async fn purchase_debits_total_cost_and_reports_success() {
        let user_id = Uuid::new_v4();
        let store = MemWalletStore::with_wallet(user_id, 100.0);
        let (engine, rx, broker, cancel) = engine_over(store.clone());
        let order_id = Uuid::new_v4();

        // 3 × 12.5 = 37.5
        engine
            .enqueue_reservation(&order(order_id, user_id, 3, 12.5))
            .await
            .unwrap();
        cancel.cancel();
        engine.run(rx).await;

        assert_eq!(store.balance_of(user_id), 62.5);
        assert_eq!(store.record_kinds(order_id), vec!["reservation"]);

        let payload = broker.poll(topics::ORDER_SUCCESS).await.unwrap().unwrap();
        let msg: OrderSuccessMsg = serde_json::from_slice(&payload).unwrap();
        assert_eq!(msg.service, ServiceTag::Wallet);
        assert_eq!(msg.order_id, order_id);
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected_without_mutation() {
        let user_id = Uuid::new_v4();
        let store = MemWalletStore::with_wallet(user_id, 10.0);
        let (engine, rx, broker, cancel) = engine_over(store.clone());
        let order_id = Uuid::new_v4();

        engine
            .enqueue_reservation(&order(order_id, user_id, 2, 25.0))
            .await
            .unwrap();
        cancel.cancel();
        engine.run(rx).await;

        assert_eq!(store.balance_of(user_id), 10.0);
        assert!(store.record_kinds(order_id).is_empty());

        let payload = broker.poll(topics::REJECTED_ORDERS).await.unwrap().unwrap();
        let msg: OrderRejectedMsg = serde_json::from_slice(&payload).unwrap();
        assert_eq!(msg.reason_code, ReasonCode::NotEnoughMoney);
        assert_eq!(msg.service, ServiceTag::Wallet);
        assert!(broker.poll(topics::ORDER_SUCCESS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn debit_then_credit_conserves_balance() {
        let user_id = Uuid::new_v4();
        let store = MemWalletStore::with_wallet(user_id, 80.0);
        let adapter = WalletAdapter::new(store.clone());
        let order_id = Uuid::new_v4();

        adapter
            .reserve(&Transaction::reservation(
                order_id,
                user_id,
                PaymentDelta { cost: 30.0 },
            ))
            .await
            .unwrap();
        assert_eq!(store.balance_of(user_id), 50.0);

        let delta = adapter.compensation_delta(order_id, user_id).await.unwrap();
        assert_eq!(delta.cost, 30.0);
        adapter
            .release(&Transaction::compensation(
                order_id,
                user_id,
                delta,
                ReasonCode::OutOfStock,
            ))
            .await
            .unwrap();

        assert_eq!(store.balance_of(user_id), 80.0);
        assert_eq!(store.record_kinds(order_id), vec!["reservation", "compensation"]);
    }

    #[tokio::test]
    async fn missing_wallet_classifies_as_internal_error() {
        let store = MemWalletStore::default();
        let (engine, rx, broker, cancel) = engine_over(store);
        let order_id = Uuid::new_v4();

        engine
            .enqueue_reservation(&order(order_id, Uuid::new_v4(), 1, 5.0))
            .await
            .unwrap();
        cancel.cancel();
        engine.run(rx).await;

        let payload = broker.poll(topics::REJECTED_ORDERS).await.unwrap().unwrap();
        let msg: OrderRejectedMsg = serde_json::from_slice(&payload).unwrap();
        assert_eq!(msg.reason_code, ReasonCode::InternalError);
    }
}
