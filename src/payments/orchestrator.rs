//! Payment intent orchestration
//!
//! Resolves the gateway for a payment method, validates the order against the
//! currency policy, makes exactly one gateway call and then records the
//! outcome in a single store write. The gateway call never runs inside a
//! database transaction.

use crate::cache::PaymentViewCache;
use crate::database::error::DatabaseError;
use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppErrorKind, AppResult};
use crate::payments::currency::{convert_to_cents, validate_amount};
use crate::payments::status::PaymentStatus;
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{
    generate_transaction_id, GatewayEvent, GatewayEventSource, GatewayKind, IntentRequest, Order,
    Payment, PaymentMethod,
};
use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempts at drawing a transaction id nobody else holds
const TRANSACTION_ID_ATTEMPTS: usize = 5;

const PHONE_PATTERN: &str = r"^\+?[0-9]{8,15}$";

/// Adapters keyed by the gateway family they serve
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    /// Adapter for a method; a method whose family has no adapter is refused
    pub fn for_method(&self, method: PaymentMethod) -> AppResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&method.gateway_kind())
            .cloned()
            .ok_or_else(|| {
                AppError::validation(format!(
                    "Payment method '{}' is not available: no gateway configured",
                    method
                ))
            })
    }

    /// Names of registered adapters, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.gateways.values().map(|g| g.name()).collect();
        names.sort_unstable();
        names
    }
}

/// Result of a successful intent creation
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub client_secret: String,
    pub status: PaymentStatus,
    pub provider: &'static str,
    pub reference: String,
    pub transaction_id: String,
    pub session_id: Option<String>,
    pub session_version: Option<String>,
    pub success_indicator: Option<String>,
}

pub struct PaymentIntentOrchestrator {
    payments: Arc<dyn PaymentStore>,
    registry: GatewayRegistry,
    currency: String,
    phone_pattern: Regex,
    cache: Option<PaymentViewCache>,
}

impl PaymentIntentOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        registry: GatewayRegistry,
        currency: impl Into<String>,
    ) -> AppResult<Self> {
        let phone_pattern = Regex::new(PHONE_PATTERN)
            .map_err(|e| AppError::configuration(format!("invalid phone pattern: {}", e)))?;

        Ok(Self {
            payments,
            registry,
            currency: currency.into(),
            phone_pattern,
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: PaymentViewCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    /// Strip formatting and check the number looks dialable
    pub fn normalize_phone(&self, raw: &str) -> AppResult<String> {
        let phone: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
            .collect();
        if self.phone_pattern.is_match(&phone) {
            Ok(phone)
        } else {
            Err(AppError::validation(format!("Invalid phone number '{}'", raw)))
        }
    }

    pub async fn create_payment_intent(
        &self,
        order: &Order,
        method: PaymentMethod,
        phone_number: Option<String>,
    ) -> AppResult<PaymentIntent> {
        let owner = order
            .owner
            .as_ref()
            .ok_or_else(|| AppError::not_found("Order owner", order.reference.clone()))?;

        let amount_cents = convert_to_cents(order.total_amount)?;
        validate_amount(amount_cents, &self.currency)?;

        let gateway = self.registry.for_method(method)?;

        let phone = if method.is_mobile_money() {
            let raw = phone_number
                .filter(|p| !p.trim().is_empty())
                .or_else(|| owner.phone_number.clone())
                .ok_or_else(|| {
                    AppError::validation("Phone number is required for mobile money payments")
                })?;
            Some(self.normalize_phone(&raw)?)
        } else {
            None
        };

        let mut payment = match self.payments.find_by_order_id(order.id).await? {
            Some(existing) if existing.status == PaymentStatus::Pending => {
                info!(payment_id = %existing.id, order_reference = %order.reference, "Reusing pending payment");
                // An indicator from another gateway family would gate webhooks it never sends
                let success_indicator = existing
                    .success_indicator
                    .clone()
                    .filter(|_| existing.method.gateway_kind() == method.gateway_kind());
                Payment {
                    method,
                    amount: order.total_amount,
                    phone_number: phone.clone(),
                    success_indicator,
                    ..existing
                }
            }
            Some(existing) => {
                return Err(AppError::validation(format!(
                    "Order {} already has a {} payment",
                    order.reference, existing.status
                )));
            }
            None => Payment::new(order.id, method, order.total_amount, phone.clone()),
        };
        let mut stale_ids: Vec<String> = payment.gateway_order_id.iter().cloned().collect();
        self.ensure_unique_transaction_id(&mut payment).await?;
        stale_ids.push(payment.transaction_id.clone());
        payment.gateway_order_id = Some(payment.transaction_id.clone());

        let request = IntentRequest {
            payment_id: payment.id,
            transaction_id: payment.transaction_id.clone(),
            method,
            amount_cents,
            currency: self.currency.clone(),
            phone_number: phone.clone(),
            customer_id: owner.id,
            order_reference: order.reference.clone(),
            description: format!("Order {}", order.reference),
        };

        let response = gateway.create_intent(&request).await.map_err(|e| {
            error!(
                user_id = %owner.id,
                amount = %order.total_amount,
                currency = %self.currency,
                order_reference = %order.reference,
                method = %method,
                phone_number = ?phone,
                "Payment intent creation failed: {}",
                e
            );
            match e.kind {
                AppErrorKind::External(ref external) => {
                    AppError::validation(format!("Payment gateway error: {}", external))
                }
                _ => e,
            }
        })?;

        if let Some(transaction_id) = response
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            payment.transaction_id = transaction_id.to_string();
        }
        if let Some(session) = &response.session {
            payment.success_indicator = Some(session.success_indicator.clone());
        }

        let event = GatewayEvent::new(
            GatewayEventSource::IntentCreated,
            serde_json::json!({
                "provider": gateway.name(),
                "status": response.status,
                "response": response.provider_data,
            }),
        );

        let saved = self
            .payments
            .save_intent(&payment, event)
            .await
            .map_err(|e| self.save_error(e, order))?;

        if let Some(cache) = &self.cache {
            let stale: Vec<&str> = stale_ids.iter().map(String::as_str).collect();
            cache.invalidate(&saved, order, &stale).await;
        }

        info!(
            payment_id = %saved.id,
            transaction_id = %saved.transaction_id,
            order_reference = %order.reference,
            provider = gateway.name(),
            "Payment intent created"
        );

        let session = response.session;
        Ok(PaymentIntent {
            id: saved.id,
            order_id: order.id,
            amount: saved.amount,
            currency: self.currency.clone(),
            client_secret: response.id,
            status: saved.status,
            provider: gateway.name(),
            reference: order.reference.clone(),
            transaction_id: saved.transaction_id,
            session_id: session.as_ref().map(|s| s.session_id.clone()),
            session_version: session.as_ref().and_then(|s| s.session_version.clone()),
            success_indicator: session.map(|s| s.success_indicator),
        })
    }

    /// The transaction id doubles as the gateway order id, so it must be free
    /// in both roles.
    async fn ensure_unique_transaction_id(&self, payment: &mut Payment) -> AppResult<()> {
        for _ in 0..TRANSACTION_ID_ATTEMPTS {
            let candidate = payment.transaction_id.as_str();
            let holder = match self.payments.find_by_transaction_id(candidate).await? {
                Some(other) => Some(other),
                None => self.payments.find_by_gateway_order_id(candidate).await?,
            };
            match holder {
                Some(other) if other.id != payment.id => {
                    warn!(transaction_id = %payment.transaction_id, "Transaction id collision, drawing a new one");
                    payment.transaction_id = generate_transaction_id(Utc::now());
                }
                _ => return Ok(()),
            }
        }
        Err(AppError::internal("could not allocate a unique transaction id"))
    }

    fn save_error(&self, err: DatabaseError, order: &Order) -> AppError {
        if err.is_conflict() || err.is_unique_violation() {
            warn!(order_reference = %order.reference, "Payment intent not recorded: {}", err);
            AppError::validation(format!(
                "A payment for order {} was recorded concurrently",
                order.reference
            ))
        } else {
            err.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::in_memory::InMemoryPaymentStore;

    fn orchestrator() -> PaymentIntentOrchestrator {
        PaymentIntentOrchestrator::new(
            Arc::new(InMemoryPaymentStore::new()),
            GatewayRegistry::new(),
            "Ar",
        )
        .unwrap()
    }

    #[test]
    fn test_unregistered_gateway_fails_fast() {
        let registry = GatewayRegistry::new();
        for method in PaymentMethod::ALL {
            let err = registry.for_method(method).err().unwrap();
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_phone_normalization() {
        let orchestrator = orchestrator();
        assert_eq!(
            orchestrator.normalize_phone("+261 34 12-345-67").unwrap(),
            "+261341234567"
        );
        assert_eq!(orchestrator.normalize_phone("0341234567").unwrap(), "0341234567");
        assert!(orchestrator.normalize_phone("12ab").unwrap_err().is_validation());
        assert!(orchestrator.normalize_phone("123").unwrap_err().is_validation());
    }
}
