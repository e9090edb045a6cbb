//! Payment HTTP handlers
//!
//! Thin adapters: decode the request, call the orchestrator or the
//! reconciliation service, shape the response. Error bodies come from
//! `AppError`'s `IntoResponse`.

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::payments::reconciliation::{ConfirmOutcome, VerifyOutcome};
use crate::payments::status::PaymentStatus;
use crate::payments::types::{Order, PaymentMethod};
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Order named by a create-intent request: a bare reference, or a relation
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OrderRef {
    Reference(String),
    Relation {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        reference: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentBody {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub order: Option<OrderRef>,
    #[serde(default)]
    pub order_reference: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    pub id: Uuid,
    pub client_secret: String,
    pub status: PaymentStatus,
    pub order_id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub provider: &'static str,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_indicator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub result_indicator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    #[serde(default)]
    pub result_indicator: Option<String>,
}

fn decode<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::validation(format!("Invalid request body: {}", rejection.body_text())))
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve every order the body names and require them to agree
async fn resolve_intent_order(state: &AppState, body: &CreateIntentBody) -> AppResult<Order> {
    let mut lookups: Vec<&str> = Vec::new();
    match &body.order {
        Some(OrderRef::Reference(reference)) => lookups.extend(present(Some(reference.as_str()))),
        Some(OrderRef::Relation { id, reference }) => {
            lookups.extend(present(reference.as_deref()));
            lookups.extend(present(id.as_deref()));
        }
        None => {}
    }
    lookups.extend(present(body.order_reference.as_deref()));

    let first = lookups
        .first()
        .ok_or_else(|| AppError::validation("Order reference is required"))?;
    let order = state.reconciliation.resolve_order(first).await?;

    for lookup in &lookups[1..] {
        let other = state.reconciliation.resolve_order(lookup).await?;
        if other.id != order.id {
            return Err(AppError::validation(format!(
                "Order reference mismatch: '{}' and '{}' name different orders",
                first, lookup
            )));
        }
    }
    Ok(order)
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    body: Result<Json<CreateIntentBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let expose = state.expose_error_details;
    let result: AppResult<Response> = async {
        let body = decode(body)?;
        let method: PaymentMethod = present(body.method.as_deref())
            .ok_or_else(|| AppError::validation("Payment method is required"))?
            .parse()?;
        let order = resolve_intent_order(&state, &body).await?;

        let intent = state
            .orchestrator
            .create_payment_intent(&order, method, body.phone_number.clone())
            .await?;

        let response = CreateIntentResponse {
            id: intent.id,
            client_secret: intent.client_secret,
            status: intent.status,
            order_id: intent.order_id,
            transaction_id: intent.transaction_id,
            amount: intent.amount,
            currency: intent.currency,
            provider: intent.provider,
            reference: intent.reference,
            session_id: intent.session_id,
            session_version: intent.session_version,
            success_indicator: intent
                .success_indicator
                .filter(|_| state.expose_success_indicator),
        };
        Ok((StatusCode::CREATED, Json(response)).into_response())
    }
    .await;

    result.map_err(|e| e.exposing_details(expose))
}

pub async fn mpgs_webhook(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    match state.reconciliation.handle_webhook(&body).await {
        Ok(ack) => Ok((StatusCode::OK, Json(ack)).into_response()),
        Err(e) => {
            warn!(status = %e.status_code(), "Webhook not processed: {}", e);
            Err(e.exposing_details(state.expose_error_details))
        }
    }
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    body: Result<Json<ConfirmBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let expose = state.expose_error_details;
    let result: AppResult<Response> = async {
        let body = decode(body)?;
        let order_id = present(body.order_id.as_deref())
            .ok_or_else(|| AppError::validation("orderId is required"))?;

        match state
            .reconciliation
            .confirm(order_id, body.result_indicator.as_deref())
            .await?
        {
            ConfirmOutcome::Confirmed(view) => {
                info!(payment_id = %view.id, order_reference = %view.order.reference, "Payment confirmed");
                Ok((StatusCode::OK, Json(view)).into_response())
            }
            ConfirmOutcome::NotCompleted { message, status } => Ok((
                StatusCode::OK,
                Json(json!({ "success": false, "message": message, "status": status })),
            )
                .into_response()),
        }
    }
    .await;

    result.map_err(|e| e.exposing_details(expose))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Response, AppError> {
    let outcome = state
        .reconciliation
        .verify(&order_id, query.result_indicator.as_deref())
        .await
        .map_err(|e| e.exposing_details(state.expose_error_details))?;

    Ok(match outcome {
        VerifyOutcome::Verified(view) => (StatusCode::OK, Json(view)).into_response(),
        VerifyOutcome::Rejected { error, status } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "verified": false, "error": error, "status": status })),
        )
            .into_response(),
    })
}

pub async fn payment_by_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let view = state
        .reconciliation
        .payment_by_order(&order_id)
        .await
        .map_err(|e| e.exposing_details(state.expose_error_details))?;
    Ok(Json(view).into_response())
}

pub async fn payment_by_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Response, AppError> {
    let view = state
        .reconciliation
        .payment_by_transaction(&transaction_id)
        .await
        .map_err(|e| e.exposing_details(state.expose_error_details))?;
    Ok(Json(view).into_response())
}
