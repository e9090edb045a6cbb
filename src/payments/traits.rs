//! Payment gateway trait definitions
//!
//! Defines the common interface that every gateway adapter implements so the
//! orchestrator can dispatch on the payment method without knowing the wire
//! protocol behind it.

use crate::error::AppResult;
use crate::payments::types::{GatewayKind, IntentRequest, IntentResponse};
use async_trait::async_trait;

/// Trait for payment gateway implementations
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name used in logs and error messages
    fn name(&self) -> &'static str;

    /// Adapter family this gateway serves
    fn kind(&self) -> GatewayKind;

    /// Open a payment intent with the gateway
    ///
    /// Implementations must not touch any store: a failure here leaves no
    /// trace behind except logs.
    ///
    /// # Arguments
    /// * `request` - Amount in minor units, currency, payer and local references
    ///
    /// # Returns
    /// * `IntentResponse` - Gateway identifiers needed to finish the collection
    async fn create_intent(&self, request: &IntentRequest) -> AppResult<IntentResponse>;
}
