//! SoleSwap API Library
//!
//! Order-reconciliation backend for the SoleSwap sneaker marketplace:
//! Stripe webhook ingress, idempotent order creation, stock decrements.
#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod dedup;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod stripe;

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, routing::post, Router};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::dedup::DedupCache;
use crate::services::reconciler::Reconciler;
use crate::stripe::CheckoutSessionLookup;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub dedup_cache: Arc<DedupCache>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    /// Assembles the application state from its parts. The session
    /// lookup is injected so tests can stub the payment provider.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        session_lookup: Arc<dyn CheckoutSessionLookup>,
    ) -> Self {
        let dedup_cache = Arc::new(DedupCache::new(config.dedup_cache_capacity));
        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            session_lookup,
            dedup_cache.clone(),
            config.prefer_atomic_order_creation(),
            config.duplicate_window_secs,
        ));

        Self {
            db,
            config,
            dedup_cache,
            reconciler,
        }
    }
}

// Common response wrapper
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Builds the application router: webhook ingress, status/health, and
/// Swagger UI for the documented surface.
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { "soleswap-api up" }))
        .route(
            "/api/stripe/webhook",
            post(handlers::payment_webhooks::stripe_webhook),
        )
        .route("/api/v1/status", get(api_status))
        .route("/api/v1/health", get(health_check))
        .merge(openapi::swagger_ui())
}

async fn api_status() -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "soleswap-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
