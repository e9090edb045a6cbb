pub mod health;
pub mod payments;

use crate::payments::orchestrator::PaymentIntentOrchestrator;
use crate::payments::reconciliation::ReconciliationService;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentIntentOrchestrator>,
    pub reconciliation: Arc<ReconciliationService>,
    /// `None` when running against the in-memory stores
    pub pool: Option<PgPool>,
    pub environment: String,
    pub expose_success_indicator: bool,
    /// Include raw error text in 5xx bodies
    pub expose_error_details: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/create-payment-intent", post(payments::create_payment_intent))
        .route("/api/mpgs-webhook", post(payments::mpgs_webhook))
        .route("/api/confirm-payment", post(payments::confirm_payment))
        .route("/api/verify-payment/:order_id", get(payments::verify_payment))
        .route("/api/payment/order/:order_id", get(payments::payment_by_order))
        .route(
            "/api/payment/transaction/:transaction_id",
            get(payments::payment_by_transaction),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
