use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use soleswap_api::{
    config::AppConfig,
    db,
    entities::{order, order_item, product},
    errors::ServiceError,
    stripe::{signature, CheckoutSession, CheckoutSessionLookup},
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret_for_integration";

/// Checkout-session lookup stub standing in for the Stripe API.
#[derive(Default)]
pub struct StubSessionLookup {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
}

impl StubSessionLookup {
    pub fn register(&self, payment_intent_id: &str, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(payment_intent_id.to_string(), session);
    }
}

#[async_trait]
impl CheckoutSessionLookup for StubSessionLookup {
    async fn find_checkout_session(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutSession>, ServiceError> {
        Ok(self.sessions.lock().unwrap().get(payment_intent_id).cloned())
    }
}

/// Helper harness for spinning up an application state backed by an
/// in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub sessions: Arc<StubSessionLookup>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application after applying a config mutation,
    /// e.g. forcing the stepwise order-creation mode.
    pub async fn with_config(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            "sk_test_key".to_string(),
            WEBHOOK_SECRET.to_string(),
        );
        // A single connection keeps every request on the same in-memory
        // SQLite database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        mutate(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let sessions = Arc::new(StubSessionLookup::default());
        let state = AppState::new(Arc::new(pool), cfg, sessions.clone());
        let router = soleswap_api::app_router().with_state(state.clone());

        Self {
            router,
            state,
            sessions,
        }
    }

    /// Insert a catalog row the reconciler can price and decrement.
    pub async fn seed_product(&self, sku: &str, price: Decimal, stock_count: i32) {
        let row = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("Test product {sku}")),
            price: Set(price),
            stock_count: Set(stock_count),
            created_at: Set(Utc::now()),
        };
        product::Entity::insert(row)
            .exec(&*self.state.db)
            .await
            .expect("failed to seed product");
    }

    /// Deliver a webhook payload with a valid signature.
    pub async fn post_webhook(&self, payload: &Value) -> axum::response::Response {
        let body = serde_json::to_vec(payload).unwrap();
        let ts = Utc::now().timestamp().to_string();
        let header = format!(
            "t={},v1={}",
            ts,
            signature::sign_payload(&ts, &body, WEBHOOK_SECRET)
        );
        self.post_webhook_raw(body, Some(header)).await
    }

    /// Deliver raw webhook bytes, optionally with an explicit signature
    /// header (None omits the header entirely).
    pub async fn post_webhook_raw(
        &self,
        body: Vec<u8>,
        signature_header: Option<String>,
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/stripe/webhook")
            .header("content-type", "application/json");

        if let Some(header) = signature_header {
            builder = builder.header("Stripe-Signature", header);
        }

        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("request build"))
            .await
            .expect("request should produce a response")
    }

    pub async fn orders_for_user(&self, user_id: &str) -> Vec<order::Model> {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .all(&*self.state.db)
            .await
            .expect("order query")
    }

    pub async fn order_items(&self, order_id: Uuid) -> Vec<order_item::Model> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.state.db)
            .await
            .expect("order item query")
    }

    pub async fn stock_count(&self, sku: &str) -> i32 {
        product::Entity::find()
            .filter(product::Column::Sku.eq(sku))
            .one(&*self.state.db)
            .await
            .expect("product query")
            .expect("seeded product should exist")
            .stock_count
    }
}

/// Builds a `checkout.session.completed` envelope the way Stripe sends it.
pub fn checkout_completed_event(
    reference: &str,
    amount_minor_units: i64,
    cart_json: &str,
    user_id: Option<&str>,
) -> Value {
    let mut metadata = serde_json::Map::new();
    metadata.insert("cart".into(), Value::String(cart_json.to_string()));
    if let Some(user_id) = user_id {
        metadata.insert("user_id".into(), Value::String(user_id.to_string()));
    }

    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": reference,
            "amount_total": amount_minor_units,
            "metadata": metadata,
        }}
    })
}

/// Builds a `payment_intent.succeeded` envelope referencing an intent id.
pub fn payment_intent_succeeded_event(payment_intent_id: &str, amount_minor_units: i64) -> Value {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": payment_intent_id,
            "amount": amount_minor_units,
        }}
    })
}

/// Collects a response body into JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be json")
}

/// Asserts a status and returns the parsed body for further checks.
pub async fn expect_status(
    response: axum::response::Response,
    status: StatusCode,
) -> Value {
    assert_eq!(response.status(), status, "unexpected response status");
    body_json(response).await
}
