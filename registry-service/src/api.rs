use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use saga_core::{Broker, NewOrderMsg, OrderItemMsg, SagaEngine, SagaError};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

use crate::adapter::OrderAdapter;
use crate::dao::OrderStore;
use crate::models::{Order, OrderItem, Product};

pub struct AppState<S: OrderStore, B: Broker> {
    pub engine: Arc<SagaEngine<OrderAdapter<S, B>, B>>,
    pub store: S,
    pub broker: B,
}

impl<S: OrderStore + Clone, B: Broker + Clone> Clone for AppState<S, B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            store: self.store.clone(),
            broker: self.broker.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub items: Vec<CreateOrderItem>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub count: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal(e: anyhow::Error) -> ApiError {
    error!("api error: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub fn create_router<S, B>(state: AppState<S, B>) -> Router
where
    S: OrderStore + Clone,
    B: Broker + Clone,
{
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:user_id", get(list_orders))
        .route("/products", get(list_products))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Accepts the order and enqueues its reservation. The 202 only means "on
/// the pipe": the outcome arrives later through the status machine.
pub async fn create_order<S, B>(
    State(state): State<AppState<S, B>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError>
where
    S: OrderStore + Clone,
    B: Broker + Clone,
{
    if request.items.is_empty() {
        return Err(bad_request("order has no items"));
    }
    if request.items.iter().any(|item| item.count <= 0) {
        return Err(bad_request("item count must be positive"));
    }

    let product_ids: Vec<Uuid> = request.items.iter().map(|item| item.product_id).collect();
    let prices = state
        .store
        .price_map(&product_ids)
        .await
        .map_err(internal)?;

    let order_id = Uuid::new_v4();
    let mut order_items = Vec::with_capacity(request.items.len());
    for item in &request.items {
        let Some(price) = prices.get(&item.product_id) else {
            return Err(bad_request(format!("unknown product {}", item.product_id)));
        };
        order_items.push(OrderItemMsg {
            order_id,
            product_id: item.product_id,
            count: item.count,
            product_price: *price,
        });
    }

    let msg = NewOrderMsg {
        user_id: request.user_id,
        order_id,
        order_items,
    };

    match state.engine.enqueue_reservation(&msg).await {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(CreateOrderResponse {
                order_id,
                status: "pending".to_string(),
            }),
        )),
        Err(SagaError::PipeTimeout) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "order intake is overloaded, try again later".to_string(),
            }),
        )),
        Err(e) => Err(internal(e.into())),
    }
}

pub async fn list_orders<S, B>(
    State(state): State<AppState<S, B>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<OrderView>>, ApiError>
where
    S: OrderStore + Clone,
    B: Broker + Clone,
{
    let orders = state
        .store
        .orders_by_user(user_id)
        .await
        .map_err(internal)?;

    let mut views = Vec::with_capacity(orders.len());
    for order in orders {
        let items = state.store.order_items(order.id).await.map_err(internal)?;
        views.push(OrderView { order, items });
    }
    Ok(Json(views))
}

pub async fn list_products<S, B>(
    State(state): State<AppState<S, B>>,
) -> Result<Json<Vec<Product>>, ApiError>
where
    S: OrderStore + Clone,
    B: Broker + Clone,
{
    let products = state.store.products().await.map_err(internal)?;
    Ok(Json(products))
}

pub async fn health<S, B>(State(state): State<AppState<S, B>>) -> Result<&'static str, ApiError>
where
    S: OrderStore + Clone,
    B: Broker + Clone,
{
    state.store.health_check().await.map_err(|e| {
        error!("store health check failed: {e:#}");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "store unavailable".to_string(),
            }),
        )
    })?;
    state.broker.health_check().await.map_err(|e| {
        error!("broker health check failed: {e:#}");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "broker unavailable".to_string(),
            }),
        )
    })?;
    Ok("OK")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use saga_core::broker::memory::InMemoryBroker;
    use saga_core::{topics, EngineConfig, ServiceTag, TxKind};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::dao::testing::MemOrderStore;

    fn app(
        store: MemOrderStore,
    ) -> (
        Router,
        tokio::sync::mpsc::Receiver<saga_core::Transaction<crate::adapter::OrderDraft>>,
        Arc<InMemoryBroker>,
    ) {
        let broker = Arc::new(InMemoryBroker::new());
        let config = EngineConfig {
            pipe_capacity: 2,
            send_timeout: Duration::from_millis(50),
            poll_tick: Duration::from_millis(5),
        };
        let (engine, rx) = SagaEngine::new(
            ServiceTag::Registry,
            OrderAdapter::new(store.clone(), broker.clone()),
            broker.clone(),
            config,
            CancellationToken::new(),
        );
        let state = AppState {
            engine: Arc::new(engine),
            store,
            broker: broker.clone(),
        };
        (create_router(state), rx, broker)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_order_enriches_prices_and_enqueues_reservation() {
        let product_id = Uuid::new_v4();
        let store = MemOrderStore::with_products(vec![(product_id, "keyboard", 49.9)]);
        let (router, mut rx, _broker) = app(store);

        let response = router
            .oneshot(post_json(
                "/orders",
                serde_json::json!({
                    "user_id": Uuid::new_v4(),
                    "items": [{"product_id": product_id, "count": 2}],
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");

        let transaction = rx.try_recv().unwrap();
        assert_eq!(transaction.kind, TxKind::Reservation);
        assert_eq!(transaction.delta.items[0].product_price, 49.9);
        assert_eq!(transaction.delta.items[0].count, 2);
    }

    #[tokio::test]
    async fn unknown_product_is_a_bad_request() {
        let store = MemOrderStore::default();
        let (router, mut rx, _broker) = app(store);

        let response = router
            .oneshot(post_json(
                "/orders",
                serde_json::json!({
                    "user_id": Uuid::new_v4(),
                    "items": [{"product_id": Uuid::new_v4(), "count": 1}],
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_order_is_a_bad_request() {
        let store = MemOrderStore::default();
        let (router, _rx, _broker) = app(store);

        let response = router
            .oneshot(post_json(
                "/orders",
                serde_json::json!({"user_id": Uuid::new_v4(), "items": []}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn full_pipe_surfaces_as_service_unavailable() {
        let product_id = Uuid::new_v4();
        let store = MemOrderStore::with_products(vec![(product_id, "keyboard", 49.9)]);
        let (router, _rx, _broker) = app(store);

        // Capacity 2 and nobody consuming: the third request times out.
        let order = serde_json::json!({
            "user_id": Uuid::new_v4(),
            "items": [{"product_id": product_id, "count": 1}],
        });
        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(post_json("/orders", order.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        let response = router
            .oneshot(post_json("/orders", order))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn listing_orders_includes_their_items() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let store =
            MemOrderStore::with_order(order_id, user_id, crate::models::OrderStatus::Completed);
        store
            .state
            .lock()
            .unwrap()
            .items
            .push(crate::models::OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: Uuid::new_v4(),
                count: 3,
                product_price: 5.0,
            });
        let (router, _rx, _broker) = app(store);

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/orders/{user_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["status"], "completed");
        assert_eq!(body[0]["items"][0]["count"], 3);
    }

    #[tokio::test]
    async fn products_endpoint_lists_the_catalogue() {
        let store = MemOrderStore::with_products(vec![
            (Uuid::new_v4(), "keyboard", 49.9),
            (Uuid::new_v4(), "mouse", 19.9),
        ]);
        let (router, _rx, _broker) = app(store);

        let response = router
            .oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn health_reports_ok_for_live_collaborators() {
        let store = MemOrderStore::default();
        let (router, _rx, broker) = app(store);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // The probe's round-trip message must not linger on the topic.
        assert!(broker.poll(topics::HEALTH_CHECK).await.unwrap().is_none());
    }
}
