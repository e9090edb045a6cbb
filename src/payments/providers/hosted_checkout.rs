//! Hosted-checkout (card) gateway adapter
//!
//! Opens a checkout session on the gateway. The browser is then sent to the
//! gateway's hosted page; on completion the gateway redirects back with a
//! `resultIndicator` which must equal the `successIndicator` returned here.

use crate::error::{AppError, AppResult};
use crate::payments::currency::convert_from_cents;
use crate::payments::providers::http::{GatewayHttp, RetryPolicy};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{CheckoutSession, GatewayKind, IntentRequest, IntentResponse};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

const PROVIDER: &str = "hosted_checkout";

#[derive(Debug, Clone)]
pub struct HostedCheckoutConfig {
    pub base_url: String,
    pub api_version: String,
    pub merchant_id: String,
    pub api_password: String,
    /// Shown on the hosted payment page
    pub merchant_name: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    api_operation: &'static str,
    interaction: Interaction,
    order: SessionOrder,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Interaction {
    operation: &'static str,
    merchant: Merchant,
    return_url: String,
}

#[derive(Debug, Clone, Serialize)]
struct Merchant {
    name: String,
}

#[derive(Debug, Clone, Serialize)]
struct SessionOrder {
    id: String,
    currency: String,
    amount: String,
    description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session: Option<SessionInfo>,
    #[serde(default)]
    success_indicator: Option<String>,
    #[serde(default)]
    error: Option<GatewayErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

pub struct HostedCheckoutGateway {
    config: HostedCheckoutConfig,
    http: GatewayHttp,
}

impl HostedCheckoutGateway {
    pub fn new(config: HostedCheckoutConfig) -> AppResult<Self> {
        let http = GatewayHttp::new(PROVIDER, config.timeout_secs, config.retry)?;
        Ok(Self { config, http })
    }

    fn session_url(&self) -> String {
        format!(
            "{}/api/rest/version/{}/merchant/{}/session",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            self.config.merchant_id
        )
    }

    /// `Basic` credentials for the `merchant.{id}` API user
    pub fn authorization_header(&self) -> String {
        let credentials = format!("merchant.{}:{}", self.config.merchant_id, self.config.api_password);
        format!("Basic {}", STANDARD.encode(credentials))
    }

    fn session_request(&self, request: &IntentRequest) -> SessionRequest {
        SessionRequest {
            api_operation: "CREATE_CHECKOUT_SESSION",
            interaction: Interaction {
                operation: "PURCHASE",
                merchant: Merchant {
                    name: self.config.merchant_name.clone(),
                },
                return_url: self.config.return_url.clone(),
            },
            order: SessionOrder {
                id: request.transaction_id.clone(),
                currency: request.currency.clone(),
                amount: format!("{:.2}", convert_from_cents(request.amount_cents)),
                description: request.description.clone(),
            },
        }
    }
}

fn failure(response: &SessionResponse, fallback: String) -> AppError {
    let message = response
        .error
        .as_ref()
        .and_then(|e| e.explanation.clone().or_else(|| e.cause.clone()))
        .unwrap_or(fallback);
    AppError::provider(PROVIDER, message, false)
}

#[async_trait]
impl PaymentGateway for HostedCheckoutGateway {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::HostedCheckout
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<IntentResponse> {
        info!(
            payment_id = %request.payment_id,
            transaction_id = %request.transaction_id,
            amount_cents = request.amount_cents,
            currency = %request.currency,
            "Creating hosted checkout session"
        );

        let builder = self
            .http
            .client()
            .post(self.session_url())
            .header(AUTHORIZATION, self.authorization_header())
            .header(CONTENT_TYPE, "application/json")
            .json(&self.session_request(request));

        let reply = self.http.send(builder).await?;

        let provider_data: serde_json::Value =
            serde_json::from_str(&reply.body).unwrap_or(serde_json::Value::Null);
        let response: SessionResponse =
            serde_json::from_value(provider_data.clone()).unwrap_or_default();

        if !reply.is_success() || response.result.as_deref() != Some("SUCCESS") {
            let err = failure(&response, format!("Checkout session not created (HTTP {})", reply.status));
            error!(payment_id = %request.payment_id, status = %reply.status, "{}", err);
            return Err(err);
        }

        let session = response.session.clone().unwrap_or_default();
        let session_id = session
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| failure(&response, "Response is missing session id".to_string()))?;
        let success_indicator = response
            .success_indicator
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| failure(&response, "Response is missing successIndicator".to_string()))?;

        info!(
            payment_id = %request.payment_id,
            session_id = %session_id,
            "Hosted checkout session created"
        );

        Ok(IntentResponse {
            id: session_id.clone(),
            status: "pending".to_string(),
            transaction_id: None,
            session: Some(CheckoutSession {
                session_id,
                session_version: session.version,
                success_indicator,
            }),
            provider_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentMethod;
    use std::time::Duration;
    use uuid::Uuid;

    fn gateway() -> HostedCheckoutGateway {
        HostedCheckoutGateway::new(HostedCheckoutConfig {
            base_url: "https://gateway.example/".to_string(),
            api_version: "73".to_string(),
            merchant_id: "TEST01".to_string(),
            api_password: "pw".to_string(),
            merchant_name: "Pharmacy".to_string(),
            return_url: "https://shop.example/return".to_string(),
            timeout_secs: 5,
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
        })
        .unwrap()
    }

    #[test]
    fn test_session_url() {
        assert_eq!(
            gateway().session_url(),
            "https://gateway.example/api/rest/version/73/merchant/TEST01/session"
        );
    }

    #[test]
    fn test_basic_auth_uses_merchant_user() {
        let header = gateway().authorization_header();
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, "merchant.TEST01:pw");
    }

    #[test]
    fn test_session_request_amount_in_decimal_format() {
        let request = IntentRequest {
            payment_id: Uuid::new_v4(),
            transaction_id: "TXN2026123456".to_string(),
            method: PaymentMethod::Mpgs,
            amount_cents: 1050,
            currency: "USD".to_string(),
            phone_number: None,
            customer_id: Uuid::new_v4(),
            order_reference: "ORD-9".to_string(),
            description: "Order ORD-9".to_string(),
        };
        let body = serde_json::to_value(gateway().session_request(&request)).unwrap();
        assert_eq!(body["apiOperation"], "CREATE_CHECKOUT_SESSION");
        assert_eq!(body["order"]["id"], "TXN2026123456");
        assert_eq!(body["order"]["amount"], "10.50");
        assert_eq!(body["interaction"]["returnUrl"], "https://shop.example/return");
    }

    #[test]
    fn test_failure_prefers_explanation() {
        let response: SessionResponse = serde_json::from_value(serde_json::json!({
            "result": "ERROR",
            "error": {"cause": "INVALID_REQUEST", "explanation": "Invalid merchant"}
        }))
        .unwrap();
        let err = failure(&response, "fallback".to_string());
        assert!(err.to_string().contains("Invalid merchant"));
    }
}
